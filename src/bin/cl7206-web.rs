/*! Web bridge server: browser ↔ reader over HTTP and WebSocket.

```text
$ cl7206-web --listen 0.0.0.0:8080
```

Endpoints live under `/api/…`; the live tag stream is at
`/ws/inventory`. The process owns at most one reader connection,
established with `POST /api/connect {"ip": …}`.
*/
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use log::info;

use cl7206::bridge::{AppState, router};

#[derive(clap::Parser, Debug)]
#[command(version, about)]
struct Opt {
    #[arg(short = 'v', action = clap::ArgAction::Count, help = "Increase log verbosity")]
    verbose: u8,

    /// Address to serve on.
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::parse();
    stderrlog::new()
        .module(module_path!())
        .module("cl7206")
        .quiet(false)
        .verbosity(usize::from(opt.verbose))
        .timestamp(stderrlog::Timestamp::Second)
        .init()?;

    let state = Arc::new(AppState::new());
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&opt.listen).await?;
    info!("bridge listening on {}", opt.listen);
    axum::serve(listener, app).await?;
    Ok(())
}
