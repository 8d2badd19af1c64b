use crate::filter;
use crate::models::{DateWindow, Message};

#[derive(Debug)]
pub enum SourceError {
    Request(String),
}

impl SourceError {
    pub fn message(&self) -> String {
        match self {
            SourceError::Request(msg) => msg.clone(),
        }
    }
}

/// One page of channel history, newest first. `offset_id` 0 means "from the
/// latest message"; otherwise only messages strictly older than that id are
/// returned. Implemented by the gateway client and by scripted fakes in
/// tests.
pub trait MessageSource {
    fn page(&self, channel: &str, offset_id: i64, limit: u32) -> Result<Vec<Message>, SourceError>;
}

/// Walk the channel newest-to-oldest collecting messages that fall inside
/// `window` and mention `keyword`. The source is assumed to hand back pages
/// in non-increasing date order, so the first message dated strictly before
/// `window.start` ends the whole scan; an empty page does the same. Messages
/// past `window.end` are skipped without stopping the walk.
pub fn fetch_matching<S: MessageSource>(
    source: &S,
    channel: &str,
    window: &DateWindow,
    keyword: &str,
    page_size: u32,
) -> Result<Vec<Message>, SourceError> {
    let mut collected = Vec::new();
    let mut offset_id = 0i64;

    loop {
        let page = source.page(channel, offset_id, page_size)?;
        if page.is_empty() {
            return Ok(collected);
        }

        for message in &page {
            if message.date < window.start {
                return Ok(collected);
            }
            if filter::matches(message, window, keyword) {
                collected.push(message.clone());
            }
        }

        offset_id = page[page.len() - 1].id;
    }
}
