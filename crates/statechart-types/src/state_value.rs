use serde::{Deserialize, Serialize};

/// The tree of currently active state ids.
///
/// Mirrors XState's `StateValue`: a leaf is `Atomic`, a nested active child is
/// `Compound`, and simultaneously active regions are `Parallel`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StateValue {
	Atomic(String),
	Compound { id: String, child: Box<StateValue> },
	Parallel(Vec<StateValue>),
}

impl StateValue {
	#[must_use]
	pub fn atomic(id: impl Into<String>) -> Self {
		Self::Atomic(id.into())
	}

	/// Whether `state_id` appears anywhere in this value's tree, at any depth.
	#[must_use]
	pub fn matches(&self, state_id: &str) -> bool {
		match self {
			Self::Atomic(id) => id == state_id,
			Self::Compound { id, child } => id == state_id || child.matches(state_id),
			Self::Parallel(regions) => regions.iter().any(|r| r.matches(state_id)),
		}
	}

	/// All leaf (atomic) ids currently active, in tree order.
	#[must_use]
	pub fn leaf_ids(&self) -> Vec<String> {
		let mut out = Vec::new();
		self.collect_leaves(&mut out);
		out
	}

	fn collect_leaves(&self, out: &mut Vec<String>) {
		match self {
			Self::Atomic(id) => out.push(id.clone()),
			Self::Compound { child, .. } => child.collect_leaves(out),
			Self::Parallel(regions) => {
				for region in regions {
					region.collect_leaves(out);
				}
			}
		}
	}

	/// The outermost id of this value, regardless of nesting.
	#[must_use]
	pub fn top_id(&self) -> Option<&str> {
		match self {
			Self::Atomic(id) | Self::Compound { id, .. } => Some(id),
			Self::Parallel(regions) => regions.first().and_then(Self::top_id),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn atomic_matches_only_itself() {
		let v = StateValue::atomic("green");
		assert!(v.matches("green"));
		assert!(!v.matches("red"));
	}

	#[test]
	fn compound_matches_both_levels() {
		let v = StateValue::Compound {
			id: "active".into(),
			child: Box::new(StateValue::atomic("running")),
		};
		assert!(v.matches("active"));
		assert!(v.matches("running"));
		assert_eq!(v.leaf_ids(), vec!["running".to_string()]);
	}

	#[test]
	fn parallel_collects_all_region_leaves() {
		let v = StateValue::Parallel(vec![StateValue::atomic("a"), StateValue::atomic("b")]);
		assert_eq!(v.leaf_ids(), vec!["a".to_string(), "b".to_string()]);
	}
}
