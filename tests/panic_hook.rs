//! The panic hook installed by the dispatcher chains to the application's.
//!
//! Kept in its own test binary: panic hooks are process-wide.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rpcmux::status::code;
use rpcmux::transport::mem::{self, CallRequest};
use rpcmux::{CallContext, HandlerError, MethodTable, Server, Service};

static APP_HOOK_CALLS: AtomicUsize = AtomicUsize::new(0);

struct Crasher;

impl Service for Crasher {
    const NAME: &'static str = "Crasher";

    fn methods(table: &mut MethodTable<Self>) {
        table.unary_empty("Now", |_svc, ctx: CallContext| async move {
            if ctx.get("crash").is_some() {
                panic!("crashed on purpose");
            }
            Ok::<_, HandlerError>(())
        });
    }
}

#[tokio::test]
async fn test_application_hook_still_runs() {
    std::panic::set_hook(Box::new(|_| {
        APP_HOOK_CALLS.fetch_add(1, Ordering::SeqCst);
    }));

    let server = Server::builder().register(Arc::new(Crasher)).unwrap().build();
    let (stream, mut client) = mem::pair(CallRequest::new("/Crasher/Now").metadata("crash", "yes"));
    client.close_send();
    server.handle(stream).await;

    let status = client.status().await.unwrap_err();
    assert_eq!(status.code, code::BAD_REQUEST);
    assert_eq!(status.message, "panic recovered: crashed on purpose");
    assert_eq!(APP_HOOK_CALLS.load(Ordering::SeqCst), 1);
}
