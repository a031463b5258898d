use garden_web::{Context, Method, Plugin, Route, Station, StationOptions, StatusCode};

const CONFIG: &str = r#"
cache = true
cache_max_items = 10000
cache_reset_duration = "2m"

[logging]
format = "pretty"
"#;

fn user(ctx: &mut Context) {
    let id = ctx.param("id").unwrap_or_default();
    let body = format!(r#"{{"id":"{id}"}}"#);

    ctx.response_mut()
        .status(StatusCode::Ok)
        .header("Content-Type", "application/json")
        .body(body);
}

fn auth(ctx: &mut Context) {
    if ctx.request().header("authorization").is_none() {
        let _ = ctx.text(StatusCode::Unauthorized, "missing credentials");
        ctx.stop();
    }
}

#[tokio::main]
async fn main() -> garden_web::Result<()> {
    let options: StationOptions = CONFIG.parse()?;
    options.logging.init();

    let mut station = Station::with_options(options);
    station.plugin(Plugin::new("route-log", "logs every planted route").post_handle(|route| {
        tracing::info!(method = %route.method(), path = route.path(), "route added");
    }))?;

    station.get("/users/:id", user)?;
    station.handle(
        Route::new(Method::Delete, "/users/:id")
            .cors()
            .handler(auth)
            .handler(|ctx: &mut Context| {
                let _ = ctx.text(StatusCode::Ok, "deleted");
            }),
    )?;

    let listener = garden_web::bind("127.0.0.1:8080".parse().unwrap(), 1024)?;
    station
        .listen_with_shutdown(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}
