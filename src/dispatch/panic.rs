//! Backtrace capture for panics recovered during dispatch.
//!
//! `catch_unwind` only hands back the panic payload. The stack of the
//! panicking frame is recorded by a panic hook into a thread local, and the
//! dispatcher takes it on the same thread right after the unwind is caught.
//! The hook chains to whatever hook was installed before it.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::sync::Once;

thread_local! {
    static LAST_BACKTRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

static INSTALL: Once = Once::new();

pub(crate) fn install_hook() {
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            LAST_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(Backtrace::force_capture()));
            previous(info);
        }));
    });
}

/// Backtrace of the most recent panic on this thread.
pub(crate) fn take_backtrace() -> Option<Backtrace> {
    LAST_BACKTRACE.with(|slot| slot.borrow_mut().take())
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
