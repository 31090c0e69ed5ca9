//! The instrumented page: a parsed document on its own thread, reachable only
//! through bounded message channels.

use std::thread::JoinHandle;
use std::time::Duration;

use scraper::{Html, Selector};
use tokio::sync::mpsc;
use url::Url;

use super::dom::{self, ElementHandle};
use super::messages::{Envelope, HostMessage, Hover, PageMessage, Selection};
use super::{rows, selector};
use crate::extract::text::parse_selector;
use crate::types::{PluckError, PluckResult};

/// Default capacity of each direction of the page channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerKind {
    Hover,
    Click,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerEvent {
    pub kind: PointerKind,
    pub target: ElementHandle,
}

/// Everything a page can receive: host messages and pointer events.
#[derive(Debug, Clone)]
pub enum PageInput {
    Host(Envelope<HostMessage>),
    Pointer(PointerEvent),
}

/// Page-side state. Owns the document, so it never leaves its thread.
struct PageState {
    document: Html,
    base_url: Url,
    hovered: Option<ElementHandle>,
    highlighted: Option<String>,
    row_mode: Option<(String, Selector)>,
}

impl PageState {
    fn new(html: &str, base_url: Url) -> Self {
        Self {
            document: Html::parse_document(html),
            base_url,
            hovered: None,
            highlighted: None,
            row_mode: None,
        }
    }

    fn handle(&mut self, input: PageInput) -> Option<PageMessage> {
        match input {
            PageInput::Host(envelope) => self.on_host(envelope.open()?),
            PageInput::Pointer(event) => self.on_pointer(event),
        }
    }

    fn on_host(&mut self, msg: HostMessage) -> Option<PageMessage> {
        match msg {
            HostMessage::ClearSelection => {
                if let Some(previous) = self.highlighted.take() {
                    tracing::debug!(selector = %previous, "highlight cleared");
                }
                self.hovered = None;
                None
            }
            HostMessage::HighlightSelector { selector } => {
                let count = selector::match_count(&self.document, &selector);
                tracing::debug!(selector = %selector, count, "highlight");
                self.highlighted = Some(selector);
                None
            }
            HostMessage::DetectRowPattern { clicked_selector } => {
                let sel = parse_selector(&clicked_selector)?;
                let clicked = self.document.select(&sel).next()?;
                rows::describe_row(&self.document, clicked).map(PageMessage::CatalogRow)
            }
            HostMessage::EnterRowMode { row_selector } => {
                match parse_selector(&row_selector) {
                    Some(sel) => self.row_mode = Some((row_selector, sel)),
                    None => tracing::warn!(selector = %row_selector, "invalid row selector"),
                }
                None
            }
            HostMessage::ExitRowMode => {
                self.row_mode = None;
                None
            }
        }
    }

    fn on_pointer(&mut self, event: PointerEvent) -> Option<PageMessage> {
        let el = dom::element_at(&self.document, event.target)?;
        if !dom::is_selectable(&el) {
            return None;
        }
        match event.kind {
            PointerKind::Hover => {
                if self.hovered == Some(event.target) {
                    return None;
                }
                self.hovered = Some(event.target);
                Some(PageMessage::Hover(Hover {
                    tag_name: el.value().name().to_ascii_uppercase(),
                    preview: dom::preview(&el, &self.base_url),
                }))
            }
            PointerKind::Click => {
                let (selector, is_relative) = match &self.row_mode {
                    Some((row_css, row_sel)) => {
                        let Some(row) = el
                            .ancestors()
                            .filter_map(scraper::ElementRef::wrap)
                            .find(|a| row_sel.matches(a))
                        else {
                            tracing::debug!(row = %row_css, "click outside any row ignored");
                            return None;
                        };
                        (selector::generate_relative(row, el)?, true)
                    }
                    None => (selector::generate(&self.document, el), false),
                };
                Some(PageMessage::Select(Selection {
                    selector,
                    preview: dom::preview(&el, &self.base_url),
                    element_type: dom::classify(&el),
                    tag_name: el.value().name().to_ascii_uppercase(),
                    rect: dom::rect(&el),
                    is_relative,
                }))
            }
        }
    }
}

/// Spawns instrumented pages.
pub struct InstrumentedPage;

impl InstrumentedPage {
    /// Parse `html` on a dedicated thread and return the host's handle.
    pub fn spawn(html: String, base_url: Url) -> PluckResult<PageHandle> {
        Self::spawn_with_capacity(html, base_url, DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn spawn_with_capacity(
        html: String,
        base_url: Url,
        capacity: usize,
    ) -> PluckResult<PageHandle> {
        let (input_tx, mut input_rx) = mpsc::channel::<PageInput>(capacity);
        let (output_tx, output_rx) = mpsc::channel::<Envelope<PageMessage>>(capacity);

        let thread = std::thread::Builder::new()
            .name("pluck-page".into())
            .spawn(move || {
                let mut state = PageState::new(&html, base_url);
                if output_tx
                    .blocking_send(Envelope::new(PageMessage::Ready))
                    .is_err()
                {
                    return;
                }
                while let Some(input) = input_rx.blocking_recv() {
                    if let Some(msg) = state.handle(input) {
                        if output_tx.blocking_send(Envelope::new(msg)).is_err() {
                            break;
                        }
                    }
                }
                tracing::debug!("instrumented page closed");
            })
            .map_err(|e| PluckError::Instrument(format!("failed to start page thread: {e}")))?;

        let mut handle = PageHandle::connect(input_tx, output_rx);
        handle.thread = Some(thread);
        Ok(handle)
    }
}

/// Host side of an instrumented page.
pub struct PageHandle {
    input: mpsc::Sender<PageInput>,
    output: mpsc::Receiver<Envelope<PageMessage>>,
    ready: bool,
    thread: Option<JoinHandle<()>>,
}

impl PageHandle {
    /// Attach to a page over existing channels.
    pub fn connect(
        input: mpsc::Sender<PageInput>,
        output: mpsc::Receiver<Envelope<PageMessage>>,
    ) -> Self {
        Self {
            input,
            output,
            ready: false,
            thread: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Wait for the page's `ready` message. Anything else that arrives first
    /// is discarded.
    pub async fn await_ready(&mut self, timeout: Duration) -> PluckResult<()> {
        if self.ready {
            return Ok(());
        }
        let wait = async {
            while let Some(envelope) = self.output.recv().await {
                if let Some(PageMessage::Ready) = envelope.open() {
                    return Ok(());
                }
            }
            Err(PluckError::Instrument("page closed before it was ready".into()))
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(())) => {
                self.ready = true;
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(PluckError::Instrument(format!(
                "page not ready after {}ms",
                timeout.as_millis()
            ))),
        }
    }

    pub async fn send(&self, msg: HostMessage) -> PluckResult<()> {
        self.input
            .send(PageInput::Host(Envelope::new(msg)))
            .await
            .map_err(|_| PluckError::Instrument("page is closed".into()))
    }

    pub async fn pointer(&self, kind: PointerKind, target: ElementHandle) -> PluckResult<()> {
        self.input
            .send(PageInput::Pointer(PointerEvent { kind, target }))
            .await
            .map_err(|_| PluckError::Instrument("page is closed".into()))
    }

    /// Next message in our namespace, or `None` once the page is gone.
    pub async fn recv(&mut self) -> Option<PageMessage> {
        while let Some(envelope) = self.output.recv().await {
            if let Some(msg) = envelope.open() {
                return Some(msg);
            }
        }
        None
    }

    /// Like [`recv`](Self::recv) but gives up after `timeout`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<PageMessage> {
        tokio::time::timeout(timeout, self.recv()).await.ok().flatten()
    }

    /// Close the input channel and wait for the page thread to exit.
    pub fn close(self) {
        let Self {
            input,
            output,
            thread,
            ..
        } = self;
        drop(input);
        drop(output);
        if let Some(thread) = thread {
            if thread.join().is_err() {
                tracing::warn!("page thread panicked");
            }
        }
    }
}
