//! Try with `curl -H "Host: api.localhost:8080" http://127.0.0.1:8080/`.

use garden_web::{Context, LogFormat, LoggingConfig, Method, Route, Station, StatusCode};

fn site(name: &'static str) -> impl Fn(&mut Context) + Send + Sync + 'static {
    move |ctx: &mut Context| {
        let body = format!("{name}: {}", ctx.path());
        let _ = ctx.text(StatusCode::Ok, body);
    }
}

#[tokio::main]
async fn main() -> garden_web::Result<()> {
    LoggingConfig {
        format: LogFormat::Compact,
    }
    .init();

    let mut station = Station::new();
    for host in ["api.localhost:8080", "www.localhost:8080"] {
        station.handle(Route::new(Method::Get, "/").domain(host).handler(site(host)))?;
        station.handle(
            Route::new(Method::Get, "/docs/*page")
                .domain(host)
                .handler(site(host)),
        )?;
    }
    station.on_not_found(|ctx: &mut Context| {
        let body = format!("no site for host {:?}", ctx.host());
        let _ = ctx.write(body);
    });

    let listener = garden_web::bind("127.0.0.1:8080".parse().unwrap(), 1024)?;
    station
        .listen_with_shutdown(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}
