//! Augment the development of quantum network simulations with procedural macros.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, ItemFn, LitStr};

/// Run a test function with a [`tracing_subscriber`] installed for its duration.
///
/// The optional argument sets the maximum log level (`"TRACE"`, `"DEBUG"`, `"INFO"`,
/// `"WARN"`, or `"ERROR"`). When omitted, the level defaults to `"DEBUG"`.
///
/// The crate using this attribute must depend on `tracing` and `tracing-subscriber`.
///
/// # Example
///
/// ```rust,ignore
/// use qnet_macros::test_traced;
/// use tracing::{debug, info};
///
/// #[test_traced("INFO")]
/// fn test_info_level() {
///     info!("shown");
///     debug!("filtered");
/// }
/// ```
#[proc_macro_attribute]
pub fn test_traced(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);

    // Parse the requested log level
    let level = if attr.is_empty() {
        String::from("DEBUG")
    } else {
        parse_macro_input!(attr as LitStr).value()
    };
    let level = match level.to_ascii_uppercase().as_str() {
        "TRACE" => quote!(tracing::Level::TRACE),
        "DEBUG" => quote!(tracing::Level::DEBUG),
        "INFO" => quote!(tracing::Level::INFO),
        "WARN" => quote!(tracing::Level::WARN),
        "ERROR" => quote!(tracing::Level::ERROR),
        other => {
            let message = format!("invalid log level: {other}");
            return syn::Error::new(proc_macro2::Span::call_site(), message)
                .to_compile_error()
                .into();
        }
    };

    // Wrap the body so the subscriber is only active within this test
    let name = &input.sig.ident;
    let attrs = &input.attrs;
    let vis = &input.vis;
    let body = &input.block;
    let expanded = quote! {
        #[test]
        #(#attrs)*
        #vis fn #name() {
            let subscriber = tracing_subscriber::fmt()
                .with_test_writer()
                .with_max_level(#level)
                .with_line_number(true)
                .finish();
            let dispatcher = tracing::Dispatch::new(subscriber);
            tracing::dispatcher::with_default(&dispatcher, || #body);
        }
    };
    TokenStream::from(expanded)
}
