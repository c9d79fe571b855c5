use micro_async_http::protocol::MethodSet;
use micro_async_web::handler::JsonHandler;
use micro_async_web::middleware::LoggingMiddleware;
use micro_async_web::{Server, ServerConfig};

#[tokio::main]
async fn main() {
    let config = ServerConfig::new().with_default_header("Server", "micro-async-web");
    let server = Server::builder().address("127.0.0.1:3000").config(config).build().unwrap();
    server.add_middleware(LoggingMiddleware::new());

    server.on("/", MethodSet::GET, |request| {
        request.send_text(200, "text/plain", "hello world");
    });

    server.on("^/user/([0-9]+)$", MethodSet::GET, |request| {
        let uid = request.path_arg(0).unwrap_or_default().to_string();
        request.send_text(200, "text/plain", format!("user {uid}"));
    });

    server.add_handler(JsonHandler::new("/echo", |request, json| {
        request.send_text(200, "application/json", json.to_string());
    }));

    server.on_not_found(|request| {
        request.send_text(404, "text/plain", "404 not found");
    });

    server.start().await.unwrap();
}
