//! Runs the counter page headless: the host drives the page's counter through proxies while
//! the page records every render in its app scope on the host.

use std::time::Duration;

use anyhow::Result;
use tether::Value;
use tether::app::AppContext;
use tether::app::AppManager;
use tether::app::AppManagerConfig;
use tether::app::HeadlessSurface;
use tether::app::WebApp;
use tether::app::WebAppHooks;
use tracing::info;

const PAGE: &str = r#"
globalThis.counter = 0;
globalThis.increment = function () {
  this.counter += 1;
  loadPageContent(`<p id="count">${this.counter}</p>`);
  HostScope.open(app_scope_key, { allowNew: false })
    .then((scope) => scope.setVar("last_render", this.counter));
};
setTitle("Counter");
"#;

const TARGET: f64 = 3.0;

struct Counter;

impl WebAppHooks for Counter {
    fn on_load(&mut self, ctx: &mut AppContext) -> tether::Result<()> {
        let window = ctx.window()?;
        window.set_attribute("counter", 0)?;
        info!(app = ctx.key(), title = %window.document()?.title()?, "page loaded");
        Ok(())
    }

    fn update(&mut self, ctx: &mut AppContext) -> tether::Result<()> {
        let window = ctx.window()?;
        window.invoke_method("increment", vec![])?;
        let count = window.get_attribute("counter")?.materialize()?;
        let label = window.document()?.get_element("#count")?;
        let rendered = label.get_attribute("textContent")?.materialize()?;
        info!(counter = ?count, rendered = ?rendered, "tick");
        if count == Value::from(TARGET) {
            ctx.request_close();
        }
        Ok(())
    }

    fn on_close(&mut self, ctx: &mut AppContext) {
        match ctx.scope().and_then(|scope| scope.get_var("last_render")) {
            Ok(value) => info!(last_render = ?value, "closing"),
            Err(e) => info!(error = %e, "closing without a render record"),
        }
    }
}

fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config = AppManagerConfig::default().update_interval(Duration::from_millis(20));
    let mut manager = AppManager::new(config)?;
    let surface = HeadlessSurface::new().close_after(100);
    manager.add_webapp("counter", WebApp::new(PAGE).hooks(Counter), surface)?;
    manager.mainloop();
    Ok(())
}
