use garden_web::{Context, LoggingConfig, Station, StatusCode};

fn hello(ctx: &mut Context) {
    ctx.response_mut()
        .status(StatusCode::Ok)
        .header("Content-Type", "text/plain")
        .body("Hello, world!");
}

#[tokio::main]
async fn main() -> garden_web::Result<()> {
    LoggingConfig::default().init();

    let mut station = Station::new();
    station.get("/", hello)?;
    station.get("/hello/:name", |ctx: &mut Context| {
        let greeting = format!("Hello, {}!", ctx.param("name").unwrap_or("stranger"));
        let _ = ctx.text(StatusCode::Ok, greeting);
    })?;

    let listener = garden_web::bind("127.0.0.1:8080".parse().unwrap(), 1024)?;
    station
        .listen_with_shutdown(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}
