//! Document transforms applied to fetched HTML before it reaches the frame.

pub mod document;
pub mod inject;
pub mod rewrite;

pub use document::decode_text;
pub use document::extract_title;
pub use document::is_html_content_type;
pub use inject::INTERCEPTOR_MARKER;
pub use inject::NAVIGATE_MESSAGE_TYPE;
pub use inject::inject_interceptor;
pub use inject::inject_into_html;
pub use rewrite::ReferenceRewriter;
pub use rewrite::RewriteDegraded;
pub use rewrite::RewrittenDocument;
