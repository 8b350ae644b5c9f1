pub mod confirmation_poller;
pub mod outbox_dispatcher;
pub mod transaction_service;
pub mod wallet_service;
pub mod webhook_notifier;

pub use confirmation_poller::ConfirmationPoller;
pub use outbox_dispatcher::OutboxDispatcher;
pub use transaction_service::{OrchestratorConfig, TransactionService};
pub use wallet_service::WalletService;
pub use webhook_notifier::{HttpWebhookNotifier, WebhookNotifier, WebhookPayload};
