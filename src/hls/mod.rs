pub mod rewriter;
pub mod tag_uri;
