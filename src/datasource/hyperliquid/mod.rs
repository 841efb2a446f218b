pub mod exchange_client;
pub mod info_client;
pub mod ws_client;

pub use exchange_client::{ActionSigner, ExchangeClient, RemoteSigner};
pub use info_client::HyperliquidInfoClient;
pub use ws_client::{FeedSubscription, HyperliquidWsClient};
