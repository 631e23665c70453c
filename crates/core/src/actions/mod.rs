pub mod dispatcher;
pub mod handlers;
pub mod testing;

pub use dispatcher::{ActionDispatcher, Collaborators, DispatchOutcome};
pub use handlers::{
    ActionHandler, CollaboratorError, CrmClient, HandlerError, Labeler, Mailer, Notifier,
    ReplyGenerator, WebhookCaller,
};
