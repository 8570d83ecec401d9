use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, parse_quote, punctuated::Punctuated, Expr, ItemFn, Token};

/// Wraps a function returning `crate::Result` so that any error it produces
/// gains a context frame rendered from the attribute arguments.
///
/// The arguments follow `format!` syntax and may refer to the function's
/// parameters: `#[error_context("uploading {}", name)]`.
#[proc_macro_attribute]
pub fn error_context(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr with Punctuated::<Expr, Token![,]>::parse_terminated);
    let mut function = parse_macro_input!(item as ItemFn);
    let block = function.block;
    let args = args.into_iter();

    function.attrs.push(parse_quote!(#[track_caller]));
    function.block = Box::new(parse_quote!({
        let __keepsake_location = std::panic::Location::caller();
        let __keepsake_message = format!(#(#args),*);
        let __keepsake_result: crate::Result<_> = (|| #block)();
        __keepsake_result.map_err(|__keepsake_error| {
            __keepsake_error.context_at(__keepsake_message, __keepsake_location)
        })
    }));

    TokenStream::from(quote!(#function))
}
