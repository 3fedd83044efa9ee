//! The encrypting data path: uploads are streamed through the cipher on
//! their way upstream, downloads are streamed back through it with the
//! keystream positioned for whatever byte range the upstream returned.

use std::io;

use anyhow::{bail, Context as _, Result};
use bytes::Bytes;
use futures_util::{StreamExt, TryStreamExt};
use http_body_util::{BodyExt, BodyStream, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT_RANGES, AUTHORIZATION, CACHE_CONTROL,
    CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, EXPIRES, LOCATION, PRAGMA,
    RANGE, WWW_AUTHENTICATE,
};
use hyper::{Method, Request, Response, StatusCode};
use reqwest::Url;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::director::{is_hop_by_hop, UpstreamRequest};
use crate::filetype::{has_file_extension, is_file_content_type};
use crate::range::resolve_span;
use crate::{Context, ProxyBody};

const CHANNEL_DEPTH: usize = 5;
const MAX_REDIRECTS: usize = 10;

/// PUT and POST: encrypt file-like bodies on their way upstream.
pub async fn upload(ctx: &Context, request: Request<Incoming>) -> Result<Response<ProxyBody>> {
    let (parts, body) = request.into_parts();
    let path = parts.uri.path().to_string();
    let upstream = ctx.director.rewrite(&path, parts.uri.query(), &parts.headers);

    let content_type = header_str(&parts.headers, CONTENT_TYPE);
    if !is_file_content_type(content_type) && !has_file_extension(&path) {
        debug!(%path, content_type, "upload is not file content, forwarding unencrypted");
        return forward_body(ctx, parts.method, upstream, body).await;
    }

    let Some(content_length) = parse_u64_header(&parts.headers, CONTENT_LENGTH) else {
        warn!(%path, "upload without content length cannot be keyed, forwarding unchanged");
        return forward_body(ctx, parts.method, upstream, body).await;
    };

    debug!(
        %path,
        content_length,
        algorithm = %ctx.factory.algorithm(),
        "encrypting upload",
    );
    let mut cipher = ctx.factory.cipher(content_length);
    cipher.set_position(0);

    let chunk_size = ctx.chunk_size;
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(CHANNEL_DEPTH);
    tokio::spawn(async move {
        let mut body = body;
        while let Some(frame) = body.frame().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(?err, "failed to read client body");
                    let _ = tx
                        .send(Err(io::Error::other("client body read failed")))
                        .await;
                    return;
                }
            };
            let Ok(data) = frame.into_data() else {
                continue;
            };
            for chunk in data.chunks(chunk_size) {
                let mut encrypted = chunk.to_vec();
                cipher.encrypt(&mut encrypted);
                if tx.send(Ok(Bytes::from(encrypted))).await.is_err() {
                    // Request aborted; nothing left to feed.
                    return;
                }
            }
        }
    });

    // The client's Content-Length header is forwarded verbatim; the
    // ciphertext is exactly as long as the plaintext.
    let response = ctx
        .http
        .request(parts.method, upstream.url)
        .headers(upstream.headers)
        .timeout(ctx.timeout)
        .body(reqwest::Body::wrap_stream(ReceiverStream::new(rx)))
        .send()
        .await
        .context("upstream request failed")?;
    proxy_response(response)
}

/// GET and HEAD: follow a possible 302 to signed storage, then decrypt
/// file-like bodies with the keystream positioned at the range start.
pub async fn download(ctx: &Context, request: Request<Incoming>) -> Result<Response<ProxyBody>> {
    let (parts, _body) = request.into_parts();
    let path = parts.uri.path().to_string();
    let upstream = ctx.director.rewrite(&path, parts.uri.query(), &parts.headers);

    let mut response = ctx
        .http
        .request(parts.method.clone(), upstream.url.clone())
        .headers(upstream.headers.clone())
        .timeout(ctx.timeout)
        .send()
        .await
        .context("upstream request failed")?;

    if response.status() == StatusCode::FOUND {
        response = follow_redirects(ctx, upstream.headers, response, &path).await?;
    }

    let status = response.status();
    if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
        debug!(%path, %status, "response has no content to decrypt, forwarding unchanged");
        return proxy_response(response);
    }

    let content_type = header_str(response.headers(), CONTENT_TYPE);
    let content_disposition = header_str(response.headers(), CONTENT_DISPOSITION);
    if !is_file_content_type(content_type)
        && !has_file_extension(&path)
        && !content_disposition.contains("attachment")
    {
        debug!(%path, content_type, "download is not file content, forwarding undecrypted");
        return proxy_response(response);
    }

    let content_length = parse_u64_header(response.headers(), CONTENT_LENGTH);
    let upstream_range = owned_header(response.headers(), CONTENT_RANGE);
    let client_range = owned_header(&parts.headers, RANGE);
    let Some(span) = resolve_span(
        upstream_range.as_deref(),
        client_range.as_deref(),
        content_length,
        status == StatusCode::PARTIAL_CONTENT,
    ) else {
        warn!(%path, "upstream provided no object size, forwarding undecrypted");
        return proxy_response(response);
    };

    debug!(
        %path,
        full_size = span.full_size,
        start = span.start,
        end = span.end,
        algorithm = %ctx.factory.algorithm(),
        "decrypting download",
    );
    let mut cipher = ctx.factory.cipher(span.full_size);
    cipher.set_position(span.start);

    let partial = span.partial || span.start > 0;
    let mut builder = Response::builder().status(if partial {
        StatusCode::PARTIAL_CONTENT
    } else {
        status
    });
    if let Some(headers) = builder.headers_mut() {
        copy_response_headers(headers, response.headers());
        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        if partial {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(span.len()));
            let range = format!("bytes {}-{}/{}", span.start, span.end, span.full_size);
            headers.insert(
                CONTENT_RANGE,
                HeaderValue::try_from(range).context("invalid content range")?,
            );
        } else {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(span.full_size));
        }
        headers.insert(
            CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-store, must-revalidate"),
        );
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert(EXPIRES, HeaderValue::from_static("0"));
    }

    let (tx, rx) = mpsc::channel::<Bytes>(CHANNEL_DEPTH);
    let mut upstream_body = response.bytes_stream();
    tokio::spawn(async move {
        // Deliver at most the span, then end the body even if the
        // upstream keeps sending.
        let mut remaining = span.len();
        while remaining > 0 {
            let Some(chunk) = upstream_body.next().await else {
                break;
            };
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    warn!(?err, "failed to read upstream body");
                    break;
                }
            };
            let take = (chunk.len() as u64).min(remaining) as usize;
            if take == 0 {
                continue;
            }
            let mut decrypted = chunk[..take].to_vec();
            cipher.decrypt(&mut decrypted);
            remaining -= take as u64;
            if tx.send(Bytes::from(decrypted)).await.is_err() {
                break;
            }
        }
    });

    Ok(builder
        .body(stream_body(ReceiverStream::new(rx)))
        .expect("response builder failed"))
}

/// Remaining WebDAV verbs: rewritten by the director and streamed through
/// untouched.
pub async fn forward(ctx: &Context, request: Request<Incoming>) -> Result<Response<ProxyBody>> {
    let (parts, body) = request.into_parts();
    let upstream = ctx
        .director
        .rewrite(parts.uri.path(), parts.uri.query(), &parts.headers);
    forward_body(ctx, parts.method, upstream, body).await
}

async fn forward_body(
    ctx: &Context,
    method: Method,
    upstream: UpstreamRequest,
    body: Incoming,
) -> Result<Response<ProxyBody>> {
    let stream = BodyStream::new(body).map_ok(|frame| frame.into_data().unwrap_or_default());
    let response = ctx
        .http
        .request(method, upstream.url)
        .headers(upstream.headers)
        .timeout(ctx.timeout)
        .body(reqwest::Body::wrap_stream(stream))
        .send()
        .await
        .context("upstream request failed")?;
    proxy_response(response)
}

/// Follows `302 Found` chains by hand, so that `Authorization` can be
/// dropped when the target looks like a pre-signed storage URL (it
/// carries a query string), and so the client-visible path stays in the
/// logs.
async fn follow_redirects(
    ctx: &Context,
    mut headers: HeaderMap,
    mut response: reqwest::Response,
    original_path: &str,
) -> Result<reqwest::Response> {
    let mut hops = 0;
    while response.status() == StatusCode::FOUND {
        if hops == MAX_REDIRECTS {
            bail!("too many redirects for {original_path}");
        }
        hops += 1;
        let location = response
            .headers()
            .get(LOCATION)
            .context("redirect without location header")?
            .to_str()
            .context("invalid location header")?;
        let target = match Url::parse(location) {
            Ok(url) => url,
            Err(_) => response
                .url()
                .join(location)
                .context("invalid redirect location")?,
        };
        if target.query().is_some() {
            headers.remove(AUTHORIZATION);
        }
        debug!(path = original_path, %target, "following upstream redirect");
        response = ctx
            .http
            .get(target)
            .headers(headers.clone())
            .timeout(ctx.timeout)
            .send()
            .await
            .context("redirect request failed")?;
    }
    Ok(response)
}

/// Converts an upstream response into a client response, streaming the
/// body through and keeping backend auth realms behind the proxy.
fn proxy_response(response: reqwest::Response) -> Result<Response<ProxyBody>> {
    let mut builder = Response::builder().status(response.status());
    if let Some(headers) = builder.headers_mut() {
        copy_response_headers(headers, response.headers());
    }
    let (tx, rx) = mpsc::channel::<Bytes>(CHANNEL_DEPTH);
    let mut body = response.bytes_stream();
    tokio::spawn(async move {
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    if tx.send(bytes).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(?err, "failed to read upstream body");
                    break;
                }
            }
        }
    });
    Ok(builder
        .body(stream_body(ReceiverStream::new(rx)))
        .expect("response builder failed"))
}

fn copy_response_headers(dst: &mut HeaderMap, src: &HeaderMap) {
    for (name, value) in src {
        if name == WWW_AUTHENTICATE || is_hop_by_hop(name) {
            continue;
        }
        dst.append(name.clone(), value.clone());
    }
}

fn stream_body(rx: ReceiverStream<Bytes>) -> ProxyBody {
    BodyExt::boxed(StreamBody::new(rx.map(|bytes| Ok(Frame::data(bytes)))))
}

fn header_str(headers: &HeaderMap, name: HeaderName) -> &str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
}

fn owned_header(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

fn parse_u64_header(headers: &HeaderMap, name: HeaderName) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}
