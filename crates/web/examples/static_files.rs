use std::sync::Arc;

use micro_async_web::Server;
use micro_async_web::filter::fn_filter;
use micro_async_web::fs::StdFileSystem;
use micro_async_web::handler::{HandlerBuilder, StaticHandler};

#[tokio::main]
async fn main() {
    let root = std::env::args().nth(1).unwrap_or_else(|| ".".to_string());
    let server = Server::builder().address("127.0.0.1:3000").build().unwrap();

    let handler = StaticHandler::new("/", Arc::new(StdFileSystem::new(root)), "/")
        .with_default_file("index.html")
        .with_cache_control("max-age=600")
        .with_template(|name| if name == "VERSION" { env!("CARGO_PKG_VERSION").to_string() } else { String::new() });
    server.add_handler(handler.with_filter(fn_filter(|request| !request.url().starts_with("/private"))));

    server.start().await.unwrap();
}
