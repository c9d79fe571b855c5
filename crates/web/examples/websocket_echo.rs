use micro_async_web::Server;
use micro_async_web::websocket::{WebSocket, WsEvent};

#[tokio::main]
async fn main() {
    let server = Server::builder().address("127.0.0.1:3000").build().unwrap();

    let ws = WebSocket::new("/ws");
    ws.on_event(|client, event| match event {
        WsEvent::Connect => {
            client.text(format!("hello client {}", client.id()));
        }
        WsEvent::Data { info, data } if info.is_message_end(data.len()) => {
            client.text(format!("echo {}", String::from_utf8_lossy(data)));
        }
        WsEvent::Error { code, reason } => {
            eprintln!("client {} closed with {code}: {}", client.id(), String::from_utf8_lossy(reason));
        }
        _ => {}
    });
    server.add_handler(ws.clone());

    let registry = ws.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(10));
        loop {
            tick.tick().await;
            registry.cleanup_clients(8);
            registry.ping_all(b"");
        }
    });

    server.start().await.unwrap();
}
