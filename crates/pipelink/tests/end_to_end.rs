//! End-to-end tests: two sessions talking over an in-process channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use pipelink::{
    ChannelTransport, Deferred, Error, Fault, Function, Object, Session, Step, Stub, Transport,
    Value, args, connect, rpc, rpc_fn,
};

/// A small service with plain, receiver-free methods.
fn calculator() -> Object {
    let listeners = Object::new();
    let store = listeners.clone();
    let fire_from = listeners;

    Object::new()
        .with(
            "add",
            Function::new(|_, args| Ok(Value::Int(args.iter().filter_map(Value::as_int).sum()))),
        )
        .with(
            "greet",
            Function::new(|_, args| {
                let name = args.first().and_then(Value::as_str).unwrap_or("nobody");
                Ok(Value::from(format!("hello, {}", name)))
            }),
        )
        .with(
            "later",
            Function::new(|_, args| {
                let n = args.first().and_then(Value::as_int).unwrap_or_default();
                Ok(Value::from(Deferred::new(async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok::<_, Fault>(Value::Int(n * 2))
                })))
            }),
        )
        .with(
            "subscribe",
            Function::new(move |_, args| {
                store.set("listener", args.into_iter().next().unwrap_or_default());
                Ok(Value::Null)
            }),
        )
        .with(
            "fire",
            Function::new(move |_, args| {
                let listener = fire_from.get("listener").unwrap_or_default();
                listener.call(&Value::Null, args)?;
                Ok(Value::Null)
            }),
        )
}

/// Connects `client` to a fresh session serving `api` and returns the server.
fn serve(api: impl Into<Value>, client: &Session) -> Session {
    let (left, right) = ChannelTransport::pair();
    let server = Session::new(api);
    connect(&server, Arc::new(left)).unwrap();
    connect(client, Arc::new(right)).unwrap();
    server
}

/// A local function that forwards every argument it receives.
fn forwarder() -> (Function, mpsc::UnboundedReceiver<Value>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let function = Function::new(move |_, args| {
        for arg in args {
            let _ = tx.send(arg);
        }
        Ok(Value::Null)
    });
    (function, rx)
}

async fn eventually(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition never held");
}

// ============================================================================
//  DRIVER
// ============================================================================

#[tokio::test]
async fn test_program_adds_remotely() {
    let (client, run) = rpc(Value::Null, |root: Stub| {
        let mut step = 0;
        move |input: Value| -> pipelink::Result<Step> {
            step += 1;
            match step {
                1 => Ok(Step::Yield(root.get("add").call(args![2, 3]).into())),
                _ => Ok(Step::Done(Value::Int(input.as_int().unwrap_or_default() * 10))),
            }
        }
    });
    let server = serve(calculator(), &client);

    assert_eq!(run.await.unwrap(), Value::Int(50));
    eventually(|| server.executor().len() == 1).await;
}

#[tokio::test]
async fn test_program_done_with_stub_resolves_it() {
    let (client, run) = rpc(Value::Null, |root: Stub| {
        move |_: Value| -> pipelink::Result<Step> {
            Ok(Step::Done(root.get("greet").call(args!["ada"]).into()))
        }
    });
    let _server = serve(calculator(), &client);

    assert_eq!(run.await.unwrap(), Value::from("hello, ada"));
}

#[tokio::test]
async fn test_async_driver_pipelines_then_resolves() {
    let (client, run) = rpc_fn(Value::Null, |root| async move {
        let greeting = root.get("greet").call(args!["bob"]);
        let sum = root.get("add").call(args![1, 2, 3]);
        Ok::<_, Error>(Value::from(vec![greeting.resolve().await?, sum.resolve().await?]))
    });
    let server = serve(calculator(), &client);

    let outcome = run.await.unwrap();
    assert_eq!(outcome, Value::from(vec![Value::from("hello, bob"), Value::Int(6)]));
    eventually(|| server.executor().len() == 1).await;
}

#[tokio::test]
async fn test_stub_is_awaitable() {
    let client = Session::new(Value::Null);
    let _server = serve(calculator(), &client);

    let sum = client.root().get("add").call(args![20, 22]).await.unwrap();
    assert_eq!(sum, Value::Int(42));
}

// ============================================================================
//  CALLBACKS AND DEFERREDS
// ============================================================================

#[tokio::test]
async fn test_callback_arguments_are_remote() {
    let client = Session::new(Value::Null);
    let _server = serve(calculator(), &client);
    let (listener, mut received) = forwarder();

    let root = client.root();
    root.get("subscribe").call(args![listener]);
    root.get("fire").call(args!["ping", 4]);

    let first = received.recv().await.unwrap();
    let second = received.recv().await.unwrap();
    let first = first.as_stub().unwrap().resolve().await.unwrap();
    let second = second.as_stub().unwrap().resolve().await.unwrap();
    assert_eq!((first, second), (Value::from("ping"), Value::Int(4)));
}

#[tokio::test]
async fn test_deferred_resolves_directly() -> anyhow::Result<()> {
    let client = Session::new(Value::Null);
    let _server = serve(calculator(), &client);

    let doubled = client.root().get("later").call(args![21]);
    assert_eq!(doubled.resolve().await?, Value::Int(42));
    Ok(())
}

#[tokio::test]
async fn test_deferred_through_continuation() {
    let client = Session::new(Value::Null);
    let _server = serve(calculator(), &client);
    let (on_resolve, mut received) = forwarder();

    let doubled = client.root().get("later").call(args![4]);
    let registration = doubled.then(on_resolve).unwrap();
    assert!(registration.read("then").is_none());

    let value = received.recv().await.unwrap();
    assert_eq!(value.as_stub().unwrap().resolve().await.unwrap(), Value::Int(8));
}

#[tokio::test]
async fn test_both_peers_expose_apis() {
    let client = Session::new(Object::new().with("name", "client"));
    let server = serve(calculator(), &client);

    let greeting = client.root().get("greet").call(args!["server"]);
    let name = server.root().get("name");
    let (mine, theirs) = tokio::join!(greeting.resolve(), name.resolve());
    assert_eq!(mine.unwrap(), Value::from("hello, server"));
    assert_eq!(theirs.unwrap(), Value::from("client"));
}

// ============================================================================
//  FAILURE
// ============================================================================

#[tokio::test]
async fn test_remote_fault_ends_both_peers() {
    let client = Session::new(Value::Null);
    let _server = serve(calculator().with("n", 1), &client);
    let root = client.root();

    // invoking a number faults on the server, which then hangs up
    let not_callable = root.get("n").call(args![]);
    let outcome = tokio::time::timeout(Duration::from_secs(2), not_callable.resolve())
        .await
        .expect("resolve never finished");
    assert!(matches!(outcome, Err(Error::Transport(_))));

    let sum = root.get("add").call(args![2, 3]);
    let later = tokio::time::timeout(Duration::from_secs(2), sum.resolve())
        .await
        .expect("resolve never finished");
    assert!(matches!(later, Err(Error::Transport(_))));
}

#[tokio::test]
async fn test_lost_peer_fails_pending_and_later_sends() {
    let (left, right) = ChannelTransport::pair();
    let client = Session::new(Value::Null);
    connect(&client, Arc::new(right)).unwrap();

    let stub = client.root().get("x");
    let waiting = tokio::spawn(async move { stub.resolve().await });

    assert_eq!(left.recv().await.unwrap().unwrap().kind(), "get");
    assert_eq!(left.recv().await.unwrap().unwrap().kind(), "fetch");
    drop(left);

    assert!(matches!(waiting.await.unwrap(), Err(Error::Transport(_))));

    let orphan = client.root().get("y");
    assert!(matches!(orphan.resolve().await, Err(Error::Transport(_))));
    assert!(client.graph().fault().is_some());
}
