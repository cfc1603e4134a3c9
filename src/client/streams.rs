//! Delivery streams handed out by [`AppClient`](super::AppClient).
//!
//! Each stream owns one route, i.e. one subscription id on the broker.
//! Dropping a stream unsubscribes.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use futures::Stream;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;

use super::app_client::ClientInner;
use crate::broker::message::{IntentMessage, ReplyStatus, TopicMessage};
use crate::transport::message::ServerMessage;
use crate::utils::error::{Result, RouteError};

pub(crate) struct Route {
    id: String,
    receiver: UnboundedReceiver<ServerMessage>,
    client: Arc<ClientInner>,
    closed: bool,
}

impl Route {
    pub(crate) fn new(
        id: String,
        receiver: UnboundedReceiver<ServerMessage>,
        client: Arc<ClientInner>,
    ) -> Self {
        Self {
            id,
            receiver,
            client,
            closed: false,
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    fn poll_frame(&mut self, cx: &mut Context<'_>) -> Poll<Option<ServerMessage>> {
        if self.closed {
            return Poll::Ready(None);
        }
        self.receiver.poll_recv(cx)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.client.close_route(&self.id);
        }
    }
}

impl Drop for Route {
    fn drop(&mut self) {
        self.close();
    }
}

/// Messages published to the topics of a subscription.
pub struct MessageStream {
    route: Route,
}

impl MessageStream {
    pub(crate) fn new(route: Route) -> Self {
        Self { route }
    }

    pub fn subscription_id(&self) -> &str {
        self.route.id()
    }
}

impl Stream for MessageStream {
    type Item = TopicMessage;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<TopicMessage>> {
        let route = &mut self.get_mut().route;
        loop {
            match ready!(route.poll_frame(cx)) {
                Some(ServerMessage::Message { message, .. }) => return Poll::Ready(Some(message)),
                Some(_) => continue,
                None => return Poll::Ready(None),
            }
        }
    }
}

/// Replies to a request or intent.
///
/// Ends after a reply with `terminal` status. A reply with `error` status
/// is yielded as [`RouteError::Reply`] and ends the stream as well.
pub struct ReplyStream {
    route: Route,
    reply_topic: String,
}

impl ReplyStream {
    pub(crate) fn new(route: Route, reply_topic: String) -> Self {
        Self { route, reply_topic }
    }

    pub fn reply_topic(&self) -> &str {
        &self.reply_topic
    }
}

impl Stream for ReplyStream {
    type Item = Result<TopicMessage>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let route = &mut self.get_mut().route;
        loop {
            let message = match ready!(route.poll_frame(cx)) {
                Some(ServerMessage::Message { message, .. }) => message,
                Some(_) => continue,
                None => return Poll::Ready(None),
            };
            return Poll::Ready(Some(match message.status() {
                ReplyStatus::Ok => Ok(message),
                ReplyStatus::Terminal => {
                    route.close();
                    Ok(message)
                }
                ReplyStatus::Error => {
                    route.close();
                    Err(RouteError::Reply(error_text(message.body.as_ref())))
                }
            }));
        }
    }
}

fn error_text(body: Option<&Value>) -> String {
    match body {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => "the replier reported an error".to_string(),
    }
}

/// Intents resolved to capabilities of this application.
pub struct IntentStream {
    route: Route,
}

impl IntentStream {
    pub(crate) fn new(route: Route) -> Self {
        Self { route }
    }
}

impl Stream for IntentStream {
    type Item = IntentMessage;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<IntentMessage>> {
        let route = &mut self.get_mut().route;
        loop {
            match ready!(route.poll_frame(cx)) {
                Some(ServerMessage::Intent { message, .. }) => return Poll::Ready(Some(message)),
                Some(_) => continue,
                None => return Poll::Ready(None),
            }
        }
    }
}

/// Successive snapshots of a registry observation.
pub struct SnapshotStream<T> {
    route: Route,
    extract: fn(ServerMessage) -> Option<Vec<T>>,
}

impl<T> SnapshotStream<T> {
    pub(crate) fn new(route: Route, extract: fn(ServerMessage) -> Option<Vec<T>>) -> Self {
        Self { route, extract }
    }
}

impl<T> Stream for SnapshotStream<T> {
    type Item = Vec<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Vec<T>>> {
        let this = self.get_mut();
        loop {
            match ready!(this.route.poll_frame(cx)) {
                Some(frame) => {
                    if let Some(snapshot) = (this.extract)(frame) {
                        return Poll::Ready(Some(snapshot));
                    }
                }
                None => return Poll::Ready(None),
            }
        }
    }
}
