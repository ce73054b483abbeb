// API module
//
// HTTP endpoints over a shared ledger handle, plus their OpenAPI document

pub mod handlers;
pub mod routes;

use utoipa::OpenApi;

use crate::blockchain;

// Re-export main components for easier access
pub use handlers::{LedgerData, SharedLedger};
pub use routes::configure_routes;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::get_chain,
        handlers::get_pending_transactions,
        handlers::new_transaction,
        handlers::mine_block,
        handlers::validate_chain,
        handlers::create_wallet,
        handlers::get_wallet_balance,
        handlers::get_wallet_transactions
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::Transaction,
            blockchain::Address,
            blockchain::DigitalSignature,
            handlers::ErrorResponse,
            handlers::ChainResponse,
            handlers::TransactionRequest,
            handlers::TransactionResponse,
            handlers::MineRequest,
            handlers::MineResponse,
            handlers::WalletResponse,
            handlers::BalanceResponse
        )
    ),
    tags(
        (name = "catcoin", description = "Ledger API endpoints")
    ),
    info(
        title = "catcoin API",
        version = "0.1.0",
        description = "A minimal proof-of-work ledger",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
pub struct ApiDoc;
