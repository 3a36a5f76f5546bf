mod comment;
pub use comment::CommentNode;

mod controller;
pub use controller::{ActionError, ControllerConfig, DeletePolicy, InteractionController};

mod http;
pub use http::HttpApi;

mod mutate;

mod tree;
pub use tree::CommentTree;

mod view;
pub use view::{Collapse, NodeView, PresentationState, VisibleComment, MAX_DISPLAY_INDENT};

pub mod api {
    pub use arbor_api::*;
}
