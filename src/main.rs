use hemmer_provider_mysql::{init_logging, serve, MysqlProvider};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    serve(MysqlProvider::new()).await
}
