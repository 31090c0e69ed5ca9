//! Interactive teaching REPL.
//!
//! Launch with `pluck teach <url>`. The page is fetched, prepared for the
//! sandbox and instrumented; the operator locates elements with CSS, clicks
//! them by number and saves the result into the mapping store. Type `/help`
//! for commands, Tab for completion.

use std::sync::Arc;
use std::time::Duration;

use pluck::instrument::{
    dom, sandbox, selector, ElementHandle, HostMessage, InstrumentedPage, PageHandle,
    PageMessage, PointerKind,
};
use pluck::store::MappingStore;
use pluck::teach::{SessionEffect, SessionState, TeachingSession};
use rustyline::completion::{Completer, Pair};
use rustyline::config::CompletionType;
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{
    Cmd, ConditionalEventHandler, Config, Editor, Event, EventContext, EventHandler, Helper,
    KeyEvent, RepeatCount,
};
use scraper::Html;
use tokio::runtime::Runtime;
use url::Url;

use crate::config::{pluck_home, ServerConfig};
use crate::fetcher::{HttpFetcher, PageFetcher};
use crate::sqlite_store::SqliteMappingStore;

/// How long to wait for the page to answer a pointer event.
const REPLY_TIMEOUT: Duration = Duration::from_millis(750);

/// Most matches listed by `/find`.
const MAX_LISTED: usize = 25;

/// Available REPL commands.
const COMMANDS: &[(&str, &str)] = &[
    ("/find", "List elements matching a CSS selector"),
    ("/hover", "Preview element N from the last /find"),
    ("/click", "Select element N for the current field"),
    ("/highlight", "Count matches for a selector on the page"),
    ("/row", "Detect the catalog row around element N"),
    ("/confirm", "Use the detected row (catalog mode)"),
    ("/done", "Finish a multi-valued field"),
    ("/skip", "Skip the current optional field"),
    ("/undo", "Go back one field"),
    ("/pattern", "Set the path pattern, e.g. /products/*"),
    ("/status", "Show fields and recorded selectors"),
    ("/save", "Save the mapping and quit"),
    ("/restart", "Start over on the same page"),
    ("/cancel", "Discard everything and quit"),
    ("/help", "Show available commands"),
    ("/exit", "Quit without saving"),
];

/// REPL helper for tab completion.
#[derive(Default)]
struct TeachHelper;

impl Completer for TeachHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let input = &line[..pos];
        if input.contains(' ') {
            return Ok((pos, Vec::new()));
        }
        let matches: Vec<Pair> = COMMANDS
            .iter()
            .filter(|(cmd, _)| cmd.starts_with(input))
            .map(|(cmd, desc)| Pair {
                display: format!("{cmd:<12} {desc}"),
                replacement: format!("{cmd} "),
            })
            .collect();
        Ok((0, matches))
    }
}

impl Hinter for TeachHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> Option<String> {
        if pos < line.len() || !line.starts_with('/') || line.contains(' ') {
            return None;
        }
        COMMANDS
            .iter()
            .find(|(cmd, _)| cmd.starts_with(line) && *cmd != line)
            .map(|(cmd, _)| cmd[line.len()..].to_string())
    }
}

impl Highlighter for TeachHelper {}
impl Validator for TeachHelper {}
impl Helper for TeachHelper {}

struct TabCompleteOrAcceptHint;

impl ConditionalEventHandler for TabCompleteOrAcceptHint {
    fn handle(
        &self,
        _evt: &Event,
        _n: RepeatCount,
        _positive: bool,
        ctx: &EventContext<'_>,
    ) -> Option<Cmd> {
        if ctx.has_hint() {
            Some(Cmd::CompleteHint)
        } else {
            Some(Cmd::Complete)
        }
    }
}

/// Whether the loop keeps reading after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// A teaching session bound to one instrumented page.
pub struct TeachRepl<'rt> {
    rt: &'rt Runtime,
    page: PageHandle,
    /// Host-side copy of the prepared page; handles index into both.
    document: Html,
    base_url: Url,
    session: TeachingSession,
    store: Arc<dyn MappingStore>,
    actor: String,
    found: Vec<ElementHandle>,
    pending_row: Option<String>,
}

impl<'rt> TeachRepl<'rt> {
    /// Instrument `html` and start a session on `page_url`, the address the
    /// page was served from after redirects. Mappings are saved under its
    /// domain, the same one extraction looks up.
    pub fn open(
        rt: &'rt Runtime,
        html: &str,
        page_url: Url,
        store: Arc<dyn MappingStore>,
        actor: &str,
        ready_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let mut session = TeachingSession::new();
        session.start(page_url.as_str())?;

        let prepared = sandbox::prepare(html, &page_url);
        let document = Html::parse_document(&prepared);
        let mut page = InstrumentedPage::spawn(prepared, page_url.clone())?;
        rt.block_on(page.await_ready(ready_timeout))?;
        session.on_page_message(PageMessage::Ready);

        Ok(Self {
            rt,
            page,
            document,
            base_url: page_url,
            session,
            store,
            actor: actor.to_string(),
            found: Vec::new(),
            pending_row: None,
        })
    }

    pub fn session(&self) -> &TeachingSession {
        &self.session
    }

    /// Run one command line.
    pub fn execute(&mut self, line: &str) -> Flow {
        let input = line.trim();
        let input = input.strip_prefix('/').unwrap_or(input);
        let mut parts = input.splitn(2, ' ');
        let cmd = parts.next().unwrap_or("");
        let args = parts.next().unwrap_or("").trim();

        match cmd {
            "" => {}
            "exit" | "quit" => return Flow::Quit,
            "help" | "h" | "?" => cmd_help(),
            "find" | "f" => self.cmd_find(args),
            "hover" => self.cmd_hover(args),
            "click" | "c" => self.cmd_click(args),
            "highlight" => self.cmd_highlight(args),
            "row" => self.cmd_row(args),
            "confirm" => self.cmd_confirm(),
            "done" => {
                let result = self.session.finish_field();
                self.report(result);
            }
            "skip" => {
                let result = self.session.skip();
                self.clear_highlight();
                self.report(result);
            }
            "undo" => {
                let result = self.session.undo();
                self.clear_highlight();
                self.report(result);
            }
            "pattern" => {
                self.session.set_path_pattern(args);
                eprintln!("  Path pattern set.");
            }
            "status" => self.cmd_status(),
            "save" => return self.cmd_save(),
            "restart" => {
                self.session.restart();
                self.pending_row = None;
                self.send(HostMessage::ExitRowMode);
                self.clear_highlight();
                self.prompt_field();
            }
            "cancel" => {
                self.session.cancel();
                eprintln!("  Session cancelled; nothing saved.");
                return Flow::Quit;
            }
            other => eprintln!("  Unknown command '/{other}'. Type /help for commands."),
        }
        Flow::Continue
    }

    /// Close the page and wait for its thread.
    pub fn close(self) {
        self.page.close();
    }

    fn cmd_find(&mut self, css: &str) {
        if css.is_empty() {
            eprintln!("  Usage: /find <css selector>");
            return;
        }
        self.found = dom::find(&self.document, css)
            .into_iter()
            .filter(|h| {
                dom::element_at(&self.document, *h).is_some_and(|el| dom::is_selectable(&el))
            })
            .collect();
        if self.found.is_empty() {
            eprintln!("  No selectable elements match '{css}'.");
            return;
        }
        for (n, handle) in self.found.iter().take(MAX_LISTED).enumerate() {
            if let Some(el) = dom::element_at(&self.document, *handle) {
                eprintln!(
                    "  \x1b[36m[{n}]\x1b[0m {:<8} {}",
                    el.value().name(),
                    dom::preview(&el, &self.base_url)
                );
            }
        }
        if self.found.len() > MAX_LISTED {
            eprintln!("  \x1b[90m… {} more\x1b[0m", self.found.len() - MAX_LISTED);
        }
    }

    fn pick(&self, args: &str) -> Option<ElementHandle> {
        let picked = args
            .parse::<usize>()
            .ok()
            .and_then(|n| self.found.get(n).copied());
        if picked.is_none() {
            eprintln!("  Give the number of an element from the last /find.");
        }
        picked
    }

    fn cmd_hover(&mut self, args: &str) {
        let Some(handle) = self.pick(args) else {
            return;
        };
        self.pointer(PointerKind::Hover, handle);
    }

    fn cmd_click(&mut self, args: &str) {
        let Some(handle) = self.pick(args) else {
            return;
        };
        if !self.pointer(PointerKind::Click, handle) {
            eprintln!("  No selection: the element is not selectable here.");
        }
    }

    fn cmd_highlight(&mut self, css: &str) {
        let count = selector::match_count(&self.document, css);
        self.send(HostMessage::HighlightSelector {
            selector: css.to_string(),
        });
        eprintln!("  '{css}' matches {count} element(s).");
    }

    fn cmd_row(&mut self, args: &str) {
        let Some(handle) = self.pick(args) else {
            return;
        };
        let Some(el) = dom::element_at(&self.document, handle) else {
            return;
        };
        let clicked_selector = selector::generate(&self.document, el);
        self.send(HostMessage::DetectRowPattern { clicked_selector });
        match self.rt.block_on(self.page.recv_timeout(REPLY_TIMEOUT)) {
            Some(msg) => self.apply(msg),
            None => eprintln!("  No repeating row found around that element."),
        }
    }

    fn cmd_confirm(&mut self) {
        let Some(row) = self.pending_row.take() else {
            eprintln!("  No detected row to confirm. Use /row <n> first.");
            return;
        };
        match self.session.confirm_row(&row) {
            Ok(msg) => {
                self.send(msg);
                eprintln!("  Catalog mode: clicks now record selectors relative to '{row}'.");
                self.prompt_field();
            }
            Err(e) => eprintln!("  \x1b[31m{e}\x1b[0m"),
        }
    }

    fn cmd_status(&self) {
        eprintln!(
            "  {} on {} ({})",
            self.session.state(),
            self.session.domain(),
            self.base_url
        );
        if let Some(row) = self.session.row_selector() {
            eprintln!("  row: {row}");
        }
        for (i, field) in self.session.fields().iter().enumerate() {
            let marker = if self.session.state() == SessionState::Selecting
                && i == self.session.current_field_index()
            {
                "\x1b[36m▸\x1b[0m"
            } else {
                " "
            };
            let recorded = self
                .session
                .mappings()
                .get(&field.id)
                .map(|m| {
                    m.selections()
                        .iter()
                        .map(|s| s.selector.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();
            let req = if field.required { "*" } else { " " };
            eprintln!("  {marker} {:<16}{req} {recorded}", field.label);
        }
    }

    fn cmd_save(&mut self) -> Flow {
        let submission = match self.session.save() {
            Ok(s) => s,
            Err(e) => {
                eprintln!("  \x1b[31m{e}\x1b[0m");
                return Flow::Continue;
            }
        };
        match self.store.upsert(
            &submission.domain,
            &submission.path_pattern,
            submission.selectors,
            &self.actor,
        ) {
            Ok((mapping, outcome)) => {
                eprintln!(
                    "  \x1b[32m✓\x1b[0m Mapping {} {:?} for {} ({})",
                    mapping.id, outcome, mapping.domain, mapping.path_pattern
                );
                Flow::Quit
            }
            Err(e) => {
                eprintln!("  \x1b[31mSave failed: {e}\x1b[0m");
                Flow::Continue
            }
        }
    }

    /// Send a pointer event and apply the reply. False when the page stayed
    /// silent.
    fn pointer(&mut self, kind: PointerKind, handle: ElementHandle) -> bool {
        if let Err(e) = self.rt.block_on(self.page.pointer(kind, handle)) {
            eprintln!("  \x1b[31m{e}\x1b[0m");
            return false;
        }
        match self.rt.block_on(self.page.recv_timeout(REPLY_TIMEOUT)) {
            Some(msg) => {
                self.apply(msg);
                true
            }
            None => false,
        }
    }

    fn apply(&mut self, msg: PageMessage) {
        match self.session.on_page_message(msg) {
            SessionEffect::Recorded {
                field,
                field_index,
                preview,
            } => {
                eprintln!("  \x1b[32m✓\x1b[0m {field}: {preview}");
                self.session.advance_after_display(field_index);
                self.prompt_field();
            }
            SessionEffect::Appended { field, count } => {
                eprintln!("  \x1b[32m+\x1b[0m {field}: {count} selected. /done when finished.");
            }
            SessionEffect::Hover { tag_name, preview } => {
                eprintln!("  \x1b[90m{tag_name}\x1b[0m {preview}");
            }
            SessionEffect::RowDetected {
                row_selector,
                preview,
                sibling_count,
            } => {
                eprintln!("  Row '{row_selector}' repeats {sibling_count} times: {preview}");
                eprintln!("  /confirm to teach this as a catalog.");
                self.pending_row = Some(row_selector);
            }
            SessionEffect::PageReady => {}
            SessionEffect::Ignored => eprintln!("  \x1b[90m(ignored)\x1b[0m"),
        }
    }

    fn report(&mut self, result: Result<(), pluck::TeachingError>) {
        match result {
            Ok(()) => self.prompt_field(),
            Err(e) => eprintln!("  \x1b[31m{e}\x1b[0m"),
        }
    }

    fn prompt_field(&self) {
        match self.session.current_field() {
            Some(field) => {
                let hint = match (field.required, field.allows_multiple) {
                    (true, _) => "required",
                    (false, true) => "optional, several allowed, /done to finish",
                    (false, false) => "optional, /skip to leave out",
                };
                eprintln!("  Next: \x1b[1m{}\x1b[0m ({hint})", field.label);
            }
            None if self.session.state() == SessionState::Complete => {
                eprintln!("  All fields visited. /save to store the mapping.");
            }
            None => {}
        }
    }

    fn send(&mut self, msg: HostMessage) {
        if let Err(e) = self.rt.block_on(self.page.send(msg)) {
            eprintln!("  \x1b[31m{e}\x1b[0m");
        }
    }

    fn clear_highlight(&mut self) {
        self.send(HostMessage::ClearSelection);
    }
}

fn cmd_help() {
    eprintln!();
    eprintln!("  Commands:");
    eprintln!();
    for (cmd, desc) in COMMANDS {
        eprintln!("    {cmd:<12} {desc}");
    }
    eprintln!();
    eprintln!("  Typical flow: /find h1, /click 0, /find .price, /click 0, /skip …, /save");
    eprintln!();
}

/// Fetch `raw_url`, instrument it and run the interactive loop.
pub fn run(rt: &Runtime, config: &ServerConfig, raw_url: &str, actor: &str) -> anyhow::Result<()> {
    let url = pluck::classify(raw_url).into_result()?;
    let fetcher = HttpFetcher::new(config.fetch_timeout)?;
    let page = rt.block_on(fetcher.fetch(&url))?;
    let store: Arc<dyn MappingStore> = Arc::new(SqliteMappingStore::open(&config.db_path)?);

    if page.final_url != url {
        tracing::info!(requested = %url, served = %page.final_url, "teaching the redirected page");
    }
    let mut repl = TeachRepl::open(
        rt,
        &page.body,
        page.final_url,
        store,
        actor,
        config.ready_timeout,
    )?;

    eprintln!();
    eprintln!(
        "  \x1b[32m\u{25c9}\x1b[0m \x1b[1mpluck teach v{}\x1b[0m \x1b[90m{}\x1b[0m",
        env!("CARGO_PKG_VERSION"),
        repl.base_url
    );
    eprintln!();
    eprintln!(
        "    \x1b[36m/help\x1b[0m for commands, \x1b[90mTab\x1b[0m to complete, \x1b[90m/exit\x1b[0m to quit."
    );
    repl.prompt_field();
    eprintln!();

    let rl_config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .completion_type(CompletionType::List)
        .completion_prompt_limit(20)
        .build();
    let mut rl: Editor<TeachHelper, rustyline::history::DefaultHistory> =
        Editor::with_config(rl_config)?;
    rl.set_helper(Some(TeachHelper));
    rl.bind_sequence(
        KeyEvent::from('\t'),
        EventHandler::Conditional(Box::new(TabCompleteOrAcceptHint)),
    );

    let hist_path = pluck_home().join("teach_history");
    if hist_path.exists() {
        let _ = rl.load_history(&hist_path);
    }

    let prompt = " \x1b[36mteach>\x1b[0m ";
    loop {
        match rl.readline(prompt) {
            Ok(line) => {
                if repl.execute(&line) == Flow::Quit {
                    break;
                }
            }
            Err(ReadlineError::Interrupted) => {
                eprintln!("  \x1b[90m(Ctrl+C)\x1b[0m Type \x1b[1m/exit\x1b[0m to quit.");
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("  Error: {err}");
                break;
            }
        }
    }

    if let Some(parent) = hist_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = rl.save_history(&hist_path);
    repl.close();
    Ok(())
}
