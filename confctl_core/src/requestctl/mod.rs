//! Edge request-filter compiler: a small boolean DSL over named
//! `pattern@slug`/`ipblock@slug` references, translated into VCL (for
//! commit) and VSL (for log matching). Ported from
//! `conftool.extensions.reqconfig`.

pub mod schema;
pub mod translate;
pub mod vcl;
pub mod view;

pub use schema::{get_obj_from_slug, ipblock_entity_type, pattern_entity_type, action_entity_type, vcl_entity_type, SYNC_ENTITIES};
pub use translate::{parse_expression, Expr, VclTranslator, VslTranslator};
pub use view::{Format, View};
