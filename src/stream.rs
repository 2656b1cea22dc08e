//! Batch conversion: many independent requests at once.
//!
//! ## Why two shapes?
//!
//! [`convert_many`] waits for every request and returns results in input
//! order, which is what a CLI converting a list of files wants.
//! [`convert_stream`] yields each result as soon as it completes so a
//! server or progress display can react immediately; items arrive in
//! completion order and carry their input index.
//!
//! Every request gets its own work directory and engine process; the only
//! thing shared is the [`Converter`] (configuration plus engine cache).

use crate::convert::Converter;
use crate::error::ConvertError;
use crate::output::ConversionResult;
use crate::request::ConversionRequest;
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use tokio_stream::Stream;
use tracing::info;

/// One finished request from [`convert_stream`]: its index in the input
/// list and its outcome.
pub type IndexedResult = (usize, Result<ConversionResult, ConvertError>);

/// A boxed stream of batch results, in completion order.
pub type ConversionStream = Pin<Box<dyn Stream<Item = IndexedResult> + Send>>;

/// Convert all `requests` with at most `concurrency` in flight; results are
/// returned in input order.
pub async fn convert_many(
    converter: &Converter,
    requests: Vec<ConversionRequest>,
    concurrency: usize,
) -> Vec<Result<ConversionResult, ConvertError>> {
    let total = requests.len();
    let mut indexed: Vec<IndexedResult> = convert_stream(converter.clone(), requests, concurrency)
        .collect()
        .await;
    indexed.sort_by_key(|(i, _)| *i);
    let ok = indexed.iter().filter(|(_, r)| r.is_ok()).count();
    info!("Batch complete: {ok}/{total} converted");
    indexed.into_iter().map(|(_, r)| r).collect()
}

/// Convert `requests` concurrently, yielding each result as it completes.
pub fn convert_stream(
    converter: Converter,
    requests: Vec<ConversionRequest>,
    concurrency: usize,
) -> ConversionStream {
    let s = stream::iter(requests.into_iter().enumerate().map(move |(i, request)| {
        let converter = converter.clone();
        async move { (i, converter.convert(&request).await) }
    }))
    .buffer_unordered(concurrency.max(1));
    Box::pin(s)
}
