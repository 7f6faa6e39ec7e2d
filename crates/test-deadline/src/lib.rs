//! Deadline-guarded test attributes.
//!
//! `#[test_deadline::deadline]` wraps a synchronous test and
//! `#[test_deadline::tokio_deadline]` wraps an async test in a
//! current-thread Tokio runtime. Both run the body on a watchdog thread and
//! fail the test once the deadline passes, so a deadlocked queue or a task
//! parked forever shows up as a failure rather than a hung suite.
//!
//! The deadline defaults to 30 seconds. Pass an integer literal for
//! seconds, or `ms = N` for milliseconds:
//!
//! ```ignore
//! #[test_deadline::tokio_deadline(5)]
//! async fn resolves_quickly() { /* ... */ }
//!
//! #[test_deadline::deadline(ms = 250)]
//! fn spins_briefly() { /* ... */ }
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Attribute, Expr, ItemFn, Lit, Meta};

const DEFAULT_DEADLINE_MS: u64 = 30_000;

#[proc_macro_attribute]
pub fn deadline(attr: TokenStream, item: TokenStream) -> TokenStream {
    let deadline_ms = match parse_deadline(attr) {
        Ok(ms) => ms,
        Err(err) => return err.to_compile_error().into(),
    };

    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_some() {
        return syn::Error::new_spanned(
            &sig.ident,
            "deadline expects a synchronous test; use tokio_deadline for async tests",
        )
        .to_compile_error()
        .into();
    }

    let attrs = strip_test_attrs(attrs);
    let body = quote! { #block };
    expand(deadline_ms, attrs, vis, sig, body)
}

#[proc_macro_attribute]
pub fn tokio_deadline(attr: TokenStream, item: TokenStream) -> TokenStream {
    let deadline_ms = match parse_deadline(attr) {
        Ok(ms) => ms,
        Err(err) => return err.to_compile_error().into(),
    };

    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            &sig.ident,
            "tokio_deadline expects an async test; use deadline for synchronous tests",
        )
        .to_compile_error()
        .into();
    }
    sig.asyncness = None;

    let attrs = strip_test_attrs(attrs);
    let body = quote! {
        {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build Tokio runtime");
            runtime.block_on(async #block);
        }
    };
    expand(deadline_ms, attrs, vis, sig, body)
}

fn expand(
    deadline_ms: u64,
    attrs: Vec<Attribute>,
    vis: syn::Visibility,
    sig: syn::Signature,
    body: TokenStream2,
) -> TokenStream {
    TokenStream::from(quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            let deadline = std::time::Duration::from_millis(#deadline_ms);
            let (done_tx, done_rx) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let outcome =
                    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| #body));
                let _ = done_tx.send(outcome);
            });
            match done_rx.recv_timeout(deadline) {
                Ok(Ok(())) => {}
                Ok(Err(panic)) => std::panic::resume_unwind(panic),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    panic!("test exceeded its {}ms deadline", #deadline_ms)
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread exited without reporting an outcome")
                }
            }
        }
    })
}

fn parse_deadline(attr: TokenStream) -> syn::Result<u64> {
    if attr.is_empty() {
        return Ok(DEFAULT_DEADLINE_MS);
    }

    // A bare integer literal is a deadline in seconds.
    if let Ok(lit) = syn::parse::<syn::LitInt>(attr.clone()) {
        return lit_to_ms(&Lit::Int(lit), 1_000);
    }

    let meta: Meta = syn::parse(attr)?;
    match meta {
        Meta::NameValue(nv) if nv.path.is_ident("ms") => match nv.value {
            Expr::Lit(expr) => lit_to_ms(&expr.lit, 1),
            other => Err(syn::Error::new_spanned(other, "expected `ms = <integer>`")),
        },
        other => Err(syn::Error::new_spanned(
            other,
            "expected an integer deadline in seconds or `ms = N`",
        )),
    }
}

fn lit_to_ms(lit: &Lit, scale: u64) -> syn::Result<u64> {
    match lit {
        Lit::Int(int) => {
            let value: u64 = int.base10_parse()?;
            if value == 0 {
                return Err(syn::Error::new_spanned(int, "deadline must be non-zero"));
            }
            Ok(value * scale)
        }
        other => Err(syn::Error::new_spanned(other, "expected an integer literal")),
    }
}

fn strip_test_attrs(attrs: Vec<Attribute>) -> Vec<Attribute> {
    attrs
        .into_iter()
        .filter(|attr| !is_test_attr(attr))
        .collect()
}

fn is_test_attr(attr: &Attribute) -> bool {
    let segments: Vec<_> = attr
        .path()
        .segments
        .iter()
        .map(|seg| seg.ident.to_string())
        .collect();
    matches!(
        segments.as_slice(),
        [single] if single.as_str() == "test"
    ) || matches!(
        segments.as_slice(),
        [first, second] if first.as_str() == "tokio" && second.as_str() == "test"
    )
}
