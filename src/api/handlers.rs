use actix_web::{web, HttpResponse, Responder};
use log::{error, info};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use std::sync::RwLock;

use crate::blockchain::{Address, Block, Blockchain, BlockchainError, ErrorKind, Transaction, Wallet};

/// The ledger shared between workers: one writer at a time, any number of
/// readers on a consistent snapshot
pub type SharedLedger = RwLock<Blockchain>;

/// Data structure for the blockchain state
pub type LedgerData = web::Data<SharedLedger>;

/// Body of every refused request
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Human readable reason
    pub error: String,

    /// Machine readable reason
    #[schema(value_type = String, example = "insufficient_balance")]
    pub kind: ErrorKind,
}

/// Response for the chain endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The length of the chain
    pub length: usize,

    /// The blocks in the chain
    pub chain: Vec<Block>,

    /// Whether the chain is valid
    pub is_valid: bool,
}

/// Request for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionRequest {
    /// The sender's address
    pub sender: String,

    /// The recipient's address
    pub recipient: String,

    /// The amount to transfer
    pub amount: f64,

    /// The sender's private key (hex, for signing)
    pub private_key: String,
}

/// Response for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    /// The message
    pub message: String,

    /// Number of transactions waiting for the next block
    pub pending_transactions: usize,
}

/// Request for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineRequest {
    /// The miner's address
    pub miner_address: String,
}

/// Response for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineResponse {
    /// The message
    pub message: String,

    /// The newly mined block
    pub block: Block,
}

/// Response for the create wallet endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct WalletResponse {
    /// The wallet's address
    pub address: String,

    /// The wallet's private key (hex encoded)
    pub private_key: String,
}

/// Response for the balance endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    pub address: String,

    /// Balance replayed from the mined chain
    pub balance: f64,
}

fn refused(err: &BlockchainError) -> HttpResponse {
    let body = ErrorResponse {
        error: err.to_string(),
        kind: err.kind(),
    };

    match err {
        BlockchainError::StaleBlock => HttpResponse::Conflict().json(body),
        _ => HttpResponse::BadRequest().json(body),
    }
}

fn lock_poisoned() -> HttpResponse {
    error!("Ledger lock poisoned by a panicked worker");
    HttpResponse::InternalServerError().json(ErrorResponse {
        error: "Ledger is unavailable".to_string(),
        kind: ErrorKind::Other,
    })
}

/// Get the full blockchain
///
/// Returns the entire blockchain and its validity status
#[utoipa::path(
    get,
    path = "/api/v1/chain",
    responses(
        (status = 200, description = "Blockchain retrieved successfully", body = ChainResponse)
    )
)]
pub async fn get_chain(ledger: LedgerData) -> impl Responder {
    let blockchain = match ledger.read() {
        Ok(blockchain) => blockchain,
        Err(_) => return lock_poisoned(),
    };

    let response = ChainResponse {
        length: blockchain.len(),
        chain: blockchain.chain().to_vec(),
        is_valid: blockchain.is_valid(),
    };

    HttpResponse::Ok().json(response)
}

/// Get all pending transactions
///
/// Returns all transactions waiting to be included in a block
#[utoipa::path(
    get,
    path = "/api/v1/transactions/pending",
    responses(
        (status = 200, description = "Pending transactions retrieved successfully", body = Vec<Transaction>)
    )
)]
pub async fn get_pending_transactions(ledger: LedgerData) -> impl Responder {
    match ledger.read() {
        Ok(blockchain) => HttpResponse::Ok().json(blockchain.pending_transactions()),
        Err(_) => lock_poisoned(),
    }
}

/// Create a new transaction
///
/// Signs a transfer with the given private key and adds it to the pending
/// transactions
#[utoipa::path(
    post,
    path = "/api/v1/transactions/new",
    request_body = TransactionRequest,
    responses(
        (status = 201, description = "Transaction accepted", body = TransactionResponse),
        (status = 400, description = "Transaction refused", body = ErrorResponse)
    )
)]
pub async fn new_transaction(
    ledger: LedgerData,
    transaction_req: web::Json<TransactionRequest>,
) -> impl Responder {
    let request = transaction_req.into_inner();

    let wallet = match Wallet::from_secret_hex(&request.private_key) {
        Ok(wallet) => wallet,
        Err(err) => {
            return HttpResponse::BadRequest().json(ErrorResponse {
                error: format!("Invalid private key: {}", err),
                kind: ErrorKind::InvalidKey,
            });
        }
    };

    let mut transaction = Transaction::new(
        Address(request.sender),
        Address(request.recipient),
        request.amount,
    );

    if let Err(err) = transaction.sign(&wallet) {
        return refused(&BlockchainError::from(err));
    }

    let mut blockchain = match ledger.write() {
        Ok(blockchain) => blockchain,
        Err(_) => return lock_poisoned(),
    };

    match blockchain.add_transaction(transaction) {
        Ok(()) => HttpResponse::Created().json(TransactionResponse {
            message: "Transaction will be added to the next block".to_string(),
            pending_transactions: blockchain.pending_transactions().len(),
        }),
        Err(err) => refused(&err),
    }
}

/// Mine a new block
///
/// Creates a new block with all pending transactions and a reward for the
/// miner. Proof-of-work runs without holding the ledger, so a block mined
/// against a tip that moved in the meantime is refused.
#[utoipa::path(
    post,
    path = "/api/v1/mine",
    request_body = MineRequest,
    responses(
        (status = 200, description = "Block mined successfully", body = MineResponse),
        (status = 400, description = "Invalid mining request", body = ErrorResponse),
        (status = 409, description = "Chain changed while mining", body = ErrorResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn mine_block(ledger: LedgerData, mine_req: web::Json<MineRequest>) -> impl Responder {
    let miner_address = Address(mine_req.into_inner().miner_address);

    let (candidate, difficulty) = {
        let blockchain = match ledger.read() {
            Ok(blockchain) => blockchain,
            Err(_) => return lock_poisoned(),
        };

        match blockchain.prepare_block(&miner_address) {
            Ok(block) => (block, blockchain.difficulty()),
            Err(err) => return refused(&err),
        }
    };

    let mined = web::block(move || {
        let mut block = candidate;
        block.mine(difficulty);
        block
    })
    .await;

    let block = match mined {
        Ok(block) => block,
        Err(err) => {
            error!("Mining worker failed: {}", err);
            return HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Mining worker failed".to_string(),
                kind: ErrorKind::Other,
            });
        }
    };

    let mut blockchain = match ledger.write() {
        Ok(blockchain) => blockchain,
        Err(_) => return lock_poisoned(),
    };

    match blockchain.commit_block(block) {
        Ok(block) => {
            info!("Miner {} appended block {}", miner_address, block.hash());
            HttpResponse::Ok().json(MineResponse {
                message: "New Block Mined".to_string(),
                block: block.clone(),
            })
        }
        Err(err) => refused(&err),
    }
}

/// Check if the blockchain is valid
///
/// Validates the entire blockchain
#[utoipa::path(
    get,
    path = "/api/v1/validate",
    responses(
        (status = 200, description = "Blockchain validation status", body = bool)
    )
)]
pub async fn validate_chain(ledger: LedgerData) -> impl Responder {
    match ledger.read() {
        Ok(blockchain) => HttpResponse::Ok().json(blockchain.is_valid()),
        Err(_) => lock_poisoned(),
    }
}

/// Create a new wallet
///
/// Creates a new wallet with a random keypair
///
/// The private key must be stored by your own
#[utoipa::path(
    post,
    path = "/api/v1/wallet/new",
    responses(
        (status = 201, description = "Wallet created successfully", body = WalletResponse)
    )
)]
pub async fn create_wallet() -> impl Responder {
    let wallet = Wallet::new();

    HttpResponse::Created().json(WalletResponse {
        address: wallet.address().to_string(),
        private_key: hex::encode(wallet.export_secret_key()),
    })
}

/// Get wallet balance
///
/// Returns the balance of a wallet
#[utoipa::path(
    get,
    path = "/api/v1/wallet/balance/{address}",
    responses(
        (status = 200, description = "Wallet balance retrieved successfully", body = BalanceResponse)
    )
)]
pub async fn get_wallet_balance(ledger: LedgerData, address: web::Path<String>) -> impl Responder {
    let wallet_address = Address(address.into_inner());

    let blockchain = match ledger.read() {
        Ok(blockchain) => blockchain,
        Err(_) => return lock_poisoned(),
    };

    HttpResponse::Ok().json(BalanceResponse {
        balance: blockchain.balance_of(&wallet_address),
        address: wallet_address.0,
    })
}

/// Get wallet history
///
/// Returns every mined transaction the wallet sent or received
#[utoipa::path(
    get,
    path = "/api/v1/wallet/transactions/{address}",
    responses(
        (status = 200, description = "Wallet transactions retrieved successfully", body = Vec<Transaction>)
    )
)]
pub async fn get_wallet_transactions(ledger: LedgerData, address: web::Path<String>) -> impl Responder {
    let wallet_address = Address(address.into_inner());

    let blockchain = match ledger.read() {
        Ok(blockchain) => blockchain,
        Err(_) => return lock_poisoned(),
    };

    let transactions: Vec<Transaction> = blockchain
        .transactions_for(&wallet_address)
        .cloned()
        .collect();

    HttpResponse::Ok().json(transactions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::configure_routes;
    use crate::config::ChainConfig;
    use actix_web::{http::StatusCode, test, App};

    fn test_ledger() -> LedgerData {
        web::Data::new(RwLock::new(Blockchain::with_config(ChainConfig {
            difficulty: 1,
            mining_reward: 100.0,
        })
        .unwrap()))
    }

    #[actix_web::test]
    async fn test_mine_then_transfer() {
        let ledger = test_ledger();
        let app = test::init_service(App::new().app_data(ledger.clone()).configure(configure_routes)).await;

        let req = test::TestRequest::post().uri("/api/v1/wallet/new").to_request();
        let alice: WalletResponse = test::call_and_read_body_json(&app, req).await;
        let req = test::TestRequest::post().uri("/api/v1/wallet/new").to_request();
        let bob: WalletResponse = test::call_and_read_body_json(&app, req).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/mine")
            .set_json(MineRequest {
                miner_address: alice.address.clone(),
            })
            .to_request();
        let mined: MineResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(mined.block.transactions().len(), 1);

        let req = test::TestRequest::post()
            .uri("/api/v1/transactions/new")
            .set_json(TransactionRequest {
                sender: alice.address.clone(),
                recipient: bob.address.clone(),
                amount: 40.0,
                private_key: alice.private_key.clone(),
            })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let req = test::TestRequest::post()
            .uri("/api/v1/mine")
            .set_json(MineRequest {
                miner_address: bob.address.clone(),
            })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/wallet/balance/{}", bob.address))
            .to_request();
        let balance: BalanceResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(balance.balance, 140.0);

        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/wallet/transactions/{}", alice.address))
            .to_request();
        let history: Vec<Transaction> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(history.len(), 2);

        let req = test::TestRequest::get().uri("/api/v1/chain").to_request();
        let chain: ChainResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(chain.length, 3);
        assert!(chain.is_valid);
    }

    #[actix_web::test]
    async fn test_transfer_without_funds_is_refused() {
        let ledger = test_ledger();
        let app = test::init_service(App::new().app_data(ledger.clone()).configure(configure_routes)).await;
        let wallet = Wallet::new();

        let req = test::TestRequest::post()
            .uri("/api/v1/transactions/new")
            .set_json(TransactionRequest {
                sender: wallet.address().to_string(),
                recipient: Wallet::new().address().to_string(),
                amount: 10.0,
                private_key: hex::encode(wallet.export_secret_key()),
            })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["kind"], "insufficient_balance");
        assert!(ledger.read().unwrap().pending_transactions().is_empty());
    }

    #[actix_web::test]
    async fn test_transfer_signed_by_other_key_is_refused() {
        let ledger = test_ledger();
        let app = test::init_service(App::new().app_data(ledger.clone()).configure(configure_routes)).await;
        let owner = Wallet::new();
        let intruder = Wallet::new();

        let req = test::TestRequest::post()
            .uri("/api/v1/transactions/new")
            .set_json(TransactionRequest {
                sender: owner.address().to_string(),
                recipient: intruder.address().to_string(),
                amount: 10.0,
                private_key: hex::encode(intruder.export_secret_key()),
            })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["kind"], "unauthorized_signer");
    }

    #[actix_web::test]
    async fn test_validate_fresh_chain() {
        let app = test::init_service(App::new().app_data(test_ledger()).configure(configure_routes)).await;

        let req = test::TestRequest::get().uri("/api/v1/validate").to_request();
        let is_valid: bool = test::call_and_read_body_json(&app, req).await;

        assert!(is_valid);
    }

    #[actix_web::test]
    async fn test_transfer_with_malformed_private_key_is_refused() {
        let app = test::init_service(App::new().app_data(test_ledger()).configure(configure_routes)).await;
        let owner = Wallet::new();

        let req = test::TestRequest::post()
            .uri("/api/v1/transactions/new")
            .set_json(TransactionRequest {
                sender: owner.address().to_string(),
                recipient: Wallet::new().address().to_string(),
                amount: 10.0,
                private_key: "not-a-hex-key".to_string(),
            })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(body.kind, ErrorKind::InvalidKey);
        assert!(body.error.starts_with("Invalid private key"));
    }
}
