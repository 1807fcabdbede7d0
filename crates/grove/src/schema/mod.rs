//! Model description format.
//!
//! A tree model is a JSON document:
//!
//! ```json
//! {
//!   "id": "model/1",
//!   "objective_field": "000002",
//!   "fields": {
//!     "000000": {"name": "age", "optype": "numeric"},
//!     "000002": {"name": "label", "optype": "categorical",
//!                "summary": {"categories": [["young", 80], ["old", 20]]}}
//!   },
//!   "root": {
//!     "output": "young", "count": 100,
//!     "distribution": [["young", 80], ["old", 20]],
//!     "children": [
//!       {"predicate": {"operator": "<", "field": "000000", "value": 30},
//!        "output": "young", "count": 80, "distribution": [["young", 80]]},
//!       {"predicate": {"operator": ">=", "field": "000000", "value": 30},
//!        "output": "old", "count": 20, "distribution": [["old", 20]]}
//!     ]
//!   }
//! }
//! ```
//!
//! Members of a boosted ensemble add `"boosting": {"weight": .., "objective_class": ..}`.
//! An ensemble lists its members by id in `"models"` and carries
//! `"boosting": {"initial_offsets": ..}` when boosted: a number for regression,
//! `[class, offset]` pairs for classification.

mod convert;
mod json;

pub use json::*;

use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Parse a description of any depth.
///
/// Every tree level nests a node object inside a `children` array, so trained
/// trees routinely exceed serde_json's default nesting limit. The limit is
/// lifted and the stack grows on demand instead.
pub fn parse_description<T: DeserializeOwned>(json: &str) -> Result<T, serde_json::Error> {
    let mut deserializer = serde_json::Deserializer::from_str(json);
    deserializer.disable_recursion_limit();
    let value = T::deserialize(serde_stacker::Deserializer::new(&mut deserializer))?;
    deserializer.end()?;
    Ok(value)
}
