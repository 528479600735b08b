//! Two sessions in one process: a calculator service and a client driving it.
//!
//! Run with `RUST_LOG=pipelink=debug` to watch the commands go by.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pipelink::{
    ChannelTransport, Function, Object, Session, SessionConfig, Value, args, connect, rpc_fn,
};

fn calculator() -> Object {
    Object::new()
        .with(
            "add",
            Function::new(|_, args| Ok(Value::Int(args.iter().filter_map(Value::as_int).sum()))),
        )
        .with(
            "mul",
            Function::new(|_, args| {
                Ok(Value::Int(args.iter().filter_map(Value::as_int).product()))
            }),
        )
        .with(
            "greet",
            Function::new(|_, args| {
                let name = args.first().and_then(Value::as_str).unwrap_or("stranger").to_string();
                let reply = args.get(1).cloned().unwrap_or_default();
                reply.call(&Value::Null, vec![Value::from(format!("hello, {}", name))])?;
                Ok(Value::Null)
            }),
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let (tx, mut replies) = mpsc::unbounded_channel();
    let on_reply = Function::new(move |_, args| {
        for arg in args {
            let _ = tx.send(arg);
        }
        Ok(Value::Null)
    });

    let (client, run) = rpc_fn(Value::Null, move |root| async move {
        // (2 + 3) * 7, sent as one burst
        let sum = root.get("add").call(args![2, 3]);
        let product = root.get("mul").call(args![sum, 7]);
        root.get("greet").call(args!["pipelink", on_reply]);

        let product = product.resolve().await?;
        info!(?product, "computed remotely");

        let greeting = match replies.recv().await {
            Some(Value::Stub(stub)) => stub.resolve().await?,
            _ => Value::Null,
        };
        info!(?greeting, "callback answered");
        Ok::<_, pipelink::Error>(product)
    });

    let (left, right) = ChannelTransport::pair();
    let server = Session::with_config(calculator(), SessionConfig::new().name("calculator"));
    connect(&server, Arc::new(left))?;
    connect(&client, Arc::new(right))?;

    let product = run.await?;
    info!(?product, "done");
    Ok(())
}
