//! Template resolution for the herald bulk message dispatcher
//!
//! Turns authored content templates into fully resolved per-recipient
//! payloads: data and context placeholders, dynamic tags with per-job
//! boundary-tag memoization, spintax expansion, recipient parsing, and
//! the campaign preparation flow that ties them together.

pub mod charset;
pub mod prepare;
pub mod recipients;
pub mod resolver;
pub mod spintax;

pub use charset::{Charset, MAX_RANDOM_LEN, random_string};
pub use prepare::{ContentTemplates, JobPreparer, PrepareError};
pub use resolver::{BoundaryTags, JobContext, RowData, TemplateResolver, ctx, normalize_key};
