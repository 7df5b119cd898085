//! Dataset handles.
//!
//! Every compiler and executor call takes an explicit [`DatasetContext`]
//! naming the warehouse dataset (and optionally the search index) to query.
//! There is no ambient "current dataset".
//!
//! # Examples
//!
//! ```
//! use helios_cohort::dataset::DatasetContext;
//!
//! let ctx = DatasetContext::builder()
//!     .project("all-of-us-ehr-dev")
//!     .dataset("synthetic_cdr20180606")
//!     .index_base_name("synth_r_2019q4_9")
//!     .correlation_id("req-42")
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(
//!     ctx.table("person"),
//!     "`all-of-us-ehr-dev.synthetic_cdr20180606.person`"
//! );
//! assert_eq!(ctx.person_index().as_deref(), Some("synth_r_2019q4_9_person"));
//! ```

mod context;
mod id;

pub use context::{DatasetContext, DatasetContextBuilder};
pub use id::DatasetId;
