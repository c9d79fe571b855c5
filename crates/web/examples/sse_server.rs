use std::time::Duration;

use micro_async_web::Server;
use micro_async_web::sse::EventSource;

#[tokio::main]
async fn main() {
    let server = Server::builder().address("127.0.0.1:3000").build().unwrap();

    let events = EventSource::new("/events");
    events.on_connect(|client| {
        if client.last_id() > 0 {
            println!("client reconnected, last event id {}", client.last_id());
        }
        client.send(Some("hello"), None, 0, 1000);
    });
    server.add_handler(events.clone());

    tokio::spawn(async move {
        let mut id = 0;
        loop {
            tokio::time::sleep(Duration::from_secs(1)).await;
            id += 1;
            let status = events.send(Some(&id.to_string()), Some("tick"), id, 0);
            println!("tick {id}: {status:?} to {} clients", events.count());
        }
    });

    server.start().await.unwrap();
}
