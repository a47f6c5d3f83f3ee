use std::cell::Cell;
use std::io::{self, Stdout};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::DateTime;
use crossbeam_channel::{unbounded, Receiver, Sender};
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, MouseEvent,
    MouseEventKind,
};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, window_size, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use textwrap::wrap;
use tracing::{debug, info, warn};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::data::{FeedService, FeedSource, PostDetail, PostService};
use crate::feed::{FeedController, FeedError, PageRequest, Phase, ScrollMetrics};
use crate::layout::LayoutSlot;
use crate::media;
use crate::serving::{Post, SearchQuery};

const COLOR_BG: Color = Color::Rgb(30, 30, 46);
const COLOR_PANEL_BG: Color = Color::Rgb(24, 24, 36);
const COLOR_PANEL_FOCUSED_BG: Color = Color::Rgb(49, 50, 68);
const COLOR_BORDER_IDLE: Color = Color::Rgb(69, 71, 90);
const COLOR_BORDER_FOCUSED: Color = Color::Rgb(137, 180, 250);
const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
const COLOR_TEXT_SECONDARY: Color = Color::Rgb(166, 173, 200);
const COLOR_ACCENT: Color = Color::Rgb(137, 180, 250);
const COLOR_SUCCESS: Color = Color::Rgb(166, 227, 161);
const COLOR_ERROR: Color = Color::Rgb(243, 139, 168);

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
/// Top border, meta line and bottom border around a card's image area.
const CARD_CHROME_ROWS: usize = 3;
/// Trailing "loading" / "end of feed" row under the last card.
const FEED_FOOTER_ROWS: usize = 1;
const MOUSE_SCROLL_ROWS: isize = 3;
const FALLBACK_CELL_HEIGHT_PX: f64 = 16.0;
const FALLBACK_VIEWPORT_ROWS: u16 = 22;

#[derive(Debug, Clone, PartialEq, Eq)]
enum ImageState {
    Loading,
    Loaded(media::Dimensions),
    Failed(String),
    Disabled,
}

#[derive(Debug, Clone)]
struct Card {
    post_id: i64,
    slot: LayoutSlot,
    image: ImageState,
}

impl Card {
    fn height(&self) -> usize {
        CARD_CHROME_ROWS + usize::from(self.slot.class().image_rows())
    }
}

enum DetailView {
    Loading { post_id: i64 },
    Ready(Box<PostDetail>),
    Failed { post_id: i64, message: String },
}

struct PendingDetail {
    request_id: u64,
}

enum AsyncResponse {
    Page {
        generation: u64,
        page: u32,
        result: Result<Vec<Post>>,
    },
    Detail {
        request_id: u64,
        result: Result<PostDetail>,
    },
}

struct Spinner {
    index: usize,
    last_tick: Instant,
}

impl Spinner {
    fn new() -> Self {
        Self {
            index: 0,
            last_tick: Instant::now(),
        }
    }

    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.index % SPINNER_FRAMES.len()]
    }

    fn advance(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_tick) >= Duration::from_millis(120) {
            self.index = (self.index + 1) % SPINNER_FRAMES.len();
            self.last_tick = now;
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.index = 0;
        self.last_tick = Instant::now();
    }
}

#[derive(Clone, Copy)]
struct CellMetrics {
    height: f64,
}

fn terminal_cell_metrics() -> CellMetrics {
    static METRICS: OnceLock<CellMetrics> = OnceLock::new();
    *METRICS.get_or_init(|| {
        window_size().ok().map_or(
            CellMetrics {
                height: FALLBACK_CELL_HEIGHT_PX,
            },
            |size| {
                let rows = f64::from(size.rows.max(1));
                let height = if size.height > 0 {
                    f64::from(size.height) / rows
                } else {
                    FALLBACK_CELL_HEIGHT_PX
                };
                CellMetrics { height }
            },
        )
    })
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let percent_x = percent_x.min(100);
    let percent_y = percent_y.min(100);
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage(100 - percent_x - (100 - percent_x) / 2),
        ])
        .split(area);
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage(100 - percent_y - (100 - percent_y) / 2),
        ])
        .split(horizontal[1]);
    vertical[1]
}

/// Truncates `text` to `width` columns (with an ellipsis) and pads it with
/// spaces to exactly `width`.
fn fit_width(text: &str, width: usize) -> String {
    let mut out = String::new();
    let mut used = 0;
    if UnicodeWidthStr::width(text) <= width {
        out.push_str(text);
        used = UnicodeWidthStr::width(text);
    } else if width > 0 {
        for ch in text.chars() {
            let ch_width = UnicodeWidthChar::width(ch).unwrap_or(0);
            if used + ch_width + 1 > width {
                break;
            }
            out.push(ch);
            used += ch_width;
        }
        out.push('…');
        used += 1;
    }
    out.extend(std::iter::repeat(' ').take(width.saturating_sub(used)));
    out
}

fn center_width(text: &str, width: usize) -> String {
    let text_width = UnicodeWidthStr::width(text);
    if text_width >= width {
        return fit_width(text, width);
    }
    let left = (width - text_width) / 2;
    let right = width - text_width - left;
    format!("{}{}{}", " ".repeat(left), text, " ".repeat(right))
}

fn post_title(post: &Post) -> String {
    let name = post.name.trim();
    if name.is_empty() {
        format!("Post #{}", post.id)
    } else {
        name.to_string()
    }
}

fn format_timestamp(seconds: i64) -> String {
    if seconds <= 0 {
        return "unknown".to_string();
    }
    DateTime::from_timestamp(seconds, 0)
        .map(|ts| ts.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[derive(Clone)]
pub struct Options {
    pub status_message: String,
    pub source: FeedSource,
    pub feed_service: Arc<dyn FeedService + Send + Sync>,
    pub post_service: Option<Arc<dyn PostService + Send + Sync>>,
    pub media_handle: Option<media::Handle>,
    pub page_size: usize,
    pub prefetch_margin: u32,
    /// How long a page fetch may run before it is reported as stalled.
    pub stall_after: Duration,
}

pub struct Model {
    status_message: String,
    source: FeedSource,
    feed: FeedController,
    generation: u64,
    cards: Vec<Card>,
    selected: usize,
    scroll_top: usize,
    viewport_rows: Cell<u16>,
    cell_height_px: f64,
    last_failure: Option<String>,
    stall_reported: bool,
    detail: Option<DetailView>,
    pending_detail: Option<PendingDetail>,
    search_input: Option<String>,
    feed_service: Arc<dyn FeedService + Send + Sync>,
    post_service: Option<Arc<dyn PostService + Send + Sync>>,
    media_handle: Option<media::Handle>,
    page_size: usize,
    prefetch_margin: u32,
    stall_after: Duration,
    needs_redraw: bool,
    spinner: Spinner,
    response_tx: Sender<AsyncResponse>,
    response_rx: Receiver<AsyncResponse>,
    image_tx: Sender<media::ImageLoaded>,
    image_rx: Receiver<media::ImageLoaded>,
    next_request_id: u64,
}

impl Model {
    pub fn new(opts: Options) -> Self {
        let (response_tx, response_rx) = unbounded();
        let (image_tx, image_rx) = unbounded();
        let viewport_rows = crossterm::terminal::size()
            .map(|(_, rows)| rows.saturating_sub(2))
            .unwrap_or(FALLBACK_VIEWPORT_ROWS);
        let mut model = Self {
            status_message: opts.status_message.clone(),
            source: opts.source.clone(),
            feed: FeedController::new(opts.page_size, opts.prefetch_margin),
            generation: 0,
            cards: Vec::new(),
            selected: 0,
            scroll_top: 0,
            viewport_rows: Cell::new(viewport_rows),
            cell_height_px: terminal_cell_metrics().height,
            last_failure: None,
            stall_reported: false,
            detail: None,
            pending_detail: None,
            search_input: None,
            feed_service: opts.feed_service.clone(),
            post_service: opts.post_service.clone(),
            media_handle: opts.media_handle.clone(),
            page_size: opts.page_size,
            prefetch_margin: opts.prefetch_margin,
            stall_after: opts.stall_after,
            needs_redraw: true,
            spinner: Spinner::new(),
            response_tx,
            response_rx,
            image_tx,
            image_rx,
            next_request_id: 1,
        };
        model.start_session(opts.source);
        model.status_message = opts.status_message;
        model
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        stdout.execute(EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        terminal.backend_mut().execute(DisableMouseCapture)?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        let tick_rate = Duration::from_millis(120);

        loop {
            if self.poll_async() {
                self.mark_dirty();
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
            }

            let timeout = tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));

            if event::poll(timeout)? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        match self.handle_key(key.code) {
                            Ok(true) => break,
                            Ok(false) => {}
                            Err(err) => {
                                self.status_message = format!("Error: {}", err);
                                self.mark_dirty();
                            }
                        }
                    }
                    Event::Mouse(mouse) => self.handle_mouse(mouse),
                    Event::Resize(_, rows) => {
                        self.viewport_rows.set(rows.saturating_sub(2));
                        self.scroll_by(0);
                    }
                    _ => {}
                }
            }

            if self.poll_async() {
                self.mark_dirty();
            }

            if last_tick.elapsed() >= tick_rate {
                last_tick = Instant::now();
                self.check_stall(last_tick);
                if self.is_loading() {
                    if self.spinner.advance() {
                        self.mark_dirty();
                    }
                } else {
                    self.spinner.reset();
                }
            }
        }

        Ok(())
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    fn is_loading(&self) -> bool {
        self.feed.is_fetching() || self.pending_detail.is_some()
    }

    /// Tears down the current feed session and starts a fresh one at page 1.
    fn start_session(&mut self, source: FeedSource) {
        self.generation = self.generation.wrapping_add(1);
        self.source = source;
        self.feed = FeedController::new(self.page_size, self.prefetch_margin);
        self.cards.clear();
        self.selected = 0;
        self.scroll_top = 0;
        self.last_failure = None;
        self.stall_reported = false;
        self.detail = None;
        self.pending_detail = None;
        self.spinner.reset();
        self.status_message = format!("Loading {}…", self.source.label());
        info!(generation = self.generation, source = %self.source.label(), "feed session started");
        if let Some(request) = self.feed.pending_request() {
            self.dispatch_page(request);
        }
        self.mark_dirty();
    }

    fn dispatch_page(&mut self, request: PageRequest) {
        let PageRequest { page, limit } = request;
        let generation = self.generation;
        let source = self.source.clone();
        let service = self.feed_service.clone();
        let tx = self.response_tx.clone();
        self.stall_reported = false;
        debug!(generation, page, limit, "dispatching page request");

        thread::spawn(move || {
            let result = service.load_page(&source, page, limit);
            let _ = tx.send(AsyncResponse::Page {
                generation,
                page,
                result,
            });
        });
    }

    fn poll_async(&mut self) -> bool {
        let mut changed = false;
        while let Ok(message) = self.response_rx.try_recv() {
            self.handle_async_response(message);
            changed = true;
        }
        while let Ok(loaded) = self.image_rx.try_recv() {
            self.handle_image_loaded(loaded);
            changed = true;
        }
        changed
    }

    fn handle_async_response(&mut self, message: AsyncResponse) {
        match message {
            AsyncResponse::Page {
                generation,
                page,
                result,
            } => {
                if generation != self.generation {
                    debug!(generation, page, "dropping page from a previous session");
                    return;
                }
                self.apply_page(result);
            }
            AsyncResponse::Detail { request_id, result } => {
                let Some(pending) = &self.pending_detail else {
                    return;
                };
                if pending.request_id != request_id {
                    return;
                }
                self.pending_detail = None;
                let post_id = match &self.detail {
                    Some(DetailView::Loading { post_id }) => *post_id,
                    // Popup was closed while loading.
                    _ => return,
                };
                self.detail = Some(match result {
                    Ok(detail) => DetailView::Ready(Box::new(detail)),
                    Err(err) => {
                        warn!(post_id, error = %format!("{err:#}"), "failed to load post details");
                        DetailView::Failed {
                            post_id,
                            message: format!("{err:#}"),
                        }
                    }
                });
            }
        }
        self.mark_dirty();
    }

    fn apply_page(&mut self, result: Result<Vec<Post>>) {
        let before = self.feed.items().len();
        match self.feed.complete(result) {
            Ok(outcome) => {
                self.last_failure = None;
                self.append_cards(before);
                info!(
                    page = outcome.page,
                    received = outcome.received,
                    ended = outcome.ended,
                    total = self.feed.items().len(),
                    "page loaded"
                );
                self.status_message = if outcome.ended {
                    if self.feed.items().is_empty() {
                        format!("No posts found for {}.", self.source.label())
                    } else {
                        format!(
                            "Loaded all {} posts from {}.",
                            self.feed.items().len(),
                            self.source.label()
                        )
                    }
                } else {
                    format!(
                        "Loaded page {} of {} ({} posts).",
                        outcome.page,
                        self.source.label(),
                        self.feed.items().len()
                    )
                };
            }
            Err(err @ FeedError::Transport { .. }) => {
                warn!(error = %err, "page fetch failed");
                self.status_message = format!("{err}. Scroll to retry.");
                self.last_failure = Some(err.to_string());
            }
            Err(err @ FeedError::NoFetchInFlight) => {
                debug!(error = %err, "ignoring unexpected page result");
            }
        }
    }

    fn append_cards(&mut self, from: usize) {
        let new_posts: Vec<(usize, i64, String)> = self.feed.items()[from..]
            .iter()
            .enumerate()
            .map(|(offset, post)| (from + offset, post.id, post.image_url.clone()))
            .collect();
        for (index, post_id, url) in new_posts {
            let image = match &self.media_handle {
                Some(handle) => {
                    handle.enqueue(
                        media::Request {
                            generation: self.generation,
                            index,
                            post_id,
                            url,
                        },
                        self.image_tx.clone(),
                    );
                    ImageState::Loading
                }
                None => ImageState::Disabled,
            };
            self.cards.push(Card {
                post_id,
                slot: LayoutSlot::default(),
                image,
            });
        }
    }

    fn handle_image_loaded(&mut self, loaded: media::ImageLoaded) {
        if loaded.generation != self.generation {
            return;
        }
        let Some(card) = self.cards.get_mut(loaded.index) else {
            return;
        };
        if card.post_id != loaded.post_id {
            return;
        }
        match loaded.result {
            Ok(dims) => {
                if let Some(class) = card.slot.assign(dims.width, dims.height) {
                    debug!(
                        post_id = card.post_id,
                        class = class.as_str(),
                        "image classified"
                    );
                    card.image = ImageState::Loaded(dims);
                } else if !card.slot.is_assigned() {
                    card.image = ImageState::Failed("image has no size".to_string());
                }
            }
            Err(err) => {
                if !card.slot.is_assigned() {
                    card.image = ImageState::Failed(format!("{err:#}"));
                }
            }
        }
        self.mark_dirty();
    }

    fn check_stall(&mut self, now: Instant) {
        if self.stall_reported || !self.feed.is_stalled(now, self.stall_after) {
            return;
        }
        self.stall_reported = true;
        let page = self.feed.pending_request().map(|req| req.page).unwrap_or(0);
        warn!(page, after = ?self.stall_after, "page request has not settled");
        self.status_message = format!("Page {page} is taking unusually long to load…");
        self.mark_dirty();
    }

    fn document_rows(&self) -> usize {
        self.cards.iter().map(Card::height).sum::<usize>() + FEED_FOOTER_ROWS
    }

    fn card_top(&self, index: usize) -> usize {
        self.cards.iter().take(index).map(Card::height).sum()
    }

    fn max_scroll(&self) -> usize {
        self.document_rows()
            .saturating_sub(usize::from(self.viewport_rows.get()))
    }

    fn rows_to_px(&self, rows: usize) -> u32 {
        let px = (rows as f64 * self.cell_height_px).round();
        px.clamp(0.0, f64::from(u32::MAX)) as u32
    }

    fn scroll_metrics(&self) -> ScrollMetrics {
        ScrollMetrics {
            scroll_height: self.rows_to_px(self.document_rows()),
            scroll_top: self.rows_to_px(self.scroll_top),
            viewport_height: self.rows_to_px(usize::from(self.viewport_rows.get())),
        }
    }

    /// Every change of scroll position ends up here.
    fn handle_scroll_event(&mut self) {
        let metrics = self.scroll_metrics();
        if let Some(request) = self.feed.request_next_page_if_needed(metrics) {
            self.status_message = format!("Loading more from {}…", self.source.label());
            self.spinner.reset();
            self.dispatch_page(request);
        }
        self.mark_dirty();
    }

    fn scroll_by(&mut self, delta: isize) {
        let max = self.max_scroll();
        let target = if delta.is_negative() {
            self.scroll_top.saturating_sub(delta.unsigned_abs())
        } else {
            self.scroll_top.saturating_add(delta.unsigned_abs())
        };
        self.scroll_top = target.min(max);
        self.keep_selection_in_view();
        self.handle_scroll_event();
    }

    fn keep_selection_in_view(&mut self) {
        if self.cards.is_empty() {
            self.selected = 0;
            return;
        }
        let view_top = self.scroll_top;
        let view_bottom = view_top + usize::from(self.viewport_rows.get());
        let top = self.card_top(self.selected);
        let bottom = top + self.cards[self.selected].height();
        if top >= view_top && bottom <= view_bottom {
            return;
        }
        let mut offset = 0;
        for (index, card) in self.cards.iter().enumerate() {
            if offset >= view_top {
                self.selected = index;
                return;
            }
            offset += card.height();
        }
        self.selected = self.cards.len() - 1;
    }

    fn select(&mut self, delta: isize) {
        if self.cards.is_empty() {
            self.scroll_by(delta);
            return;
        }
        let last = self.cards.len() - 1;
        let target = if delta.is_negative() {
            self.selected.saturating_sub(delta.unsigned_abs())
        } else {
            self.selected.saturating_add(delta.unsigned_abs()).min(last)
        };
        self.selected = target;
        self.reveal_selected();
        self.handle_scroll_event();
    }

    fn reveal_selected(&mut self) {
        let viewport = usize::from(self.viewport_rows.get());
        let top = self.card_top(self.selected);
        let bottom = top + self.cards.get(self.selected).map_or(0, Card::height);
        if top < self.scroll_top {
            self.scroll_top = top;
        } else if bottom > self.scroll_top + viewport {
            self.scroll_top = bottom.saturating_sub(viewport).min(top);
        }
        if self.selected + 1 == self.cards.len() {
            // Bring the feed footer into view under the last card.
            self.scroll_top = self.max_scroll().min(top);
        }
        self.scroll_top = self.scroll_top.min(self.max_scroll());
    }

    fn selected_post(&self) -> Option<&Post> {
        self.feed.items().get(self.selected)
    }

    fn handle_key(&mut self, code: KeyCode) -> Result<bool> {
        if self.search_input.is_some() {
            self.handle_search_key(code);
            return Ok(false);
        }
        if self.detail.is_some() {
            match code {
                KeyCode::Esc | KeyCode::Enter | KeyCode::Char('q') => {
                    self.detail = None;
                    self.pending_detail = None;
                    self.mark_dirty();
                }
                KeyCode::Char('o') => self.open_selected_image(),
                _ => {}
            }
            return Ok(false);
        }

        let page = isize::try_from(self.viewport_rows.get()).unwrap_or(1).max(1);
        match code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Esc => {
                if matches!(self.source, FeedSource::Search(_)) {
                    self.start_session(FeedSource::Latest);
                } else {
                    return Ok(true);
                }
            }
            KeyCode::Char('j') | KeyCode::Down => self.select(1),
            KeyCode::Char('k') | KeyCode::Up => self.select(-1),
            KeyCode::PageDown | KeyCode::Char(' ') => self.scroll_by(page),
            KeyCode::PageUp => self.scroll_by(-page),
            KeyCode::Char('g') | KeyCode::Home => {
                self.selected = 0;
                self.scroll_top = 0;
                self.handle_scroll_event();
            }
            KeyCode::Char('G') | KeyCode::End => {
                self.selected = self.cards.len().saturating_sub(1);
                self.scroll_top = self.max_scroll();
                self.handle_scroll_event();
            }
            KeyCode::Enter => self.open_detail(),
            KeyCode::Char('o') => self.open_selected_image(),
            KeyCode::Char('r') => {
                let source = self.source.clone();
                self.start_session(source);
            }
            KeyCode::Char('/') => {
                self.search_input = Some(String::new());
                self.status_message =
                    "Search posts by name, or @<author id>. Enter to search, Esc to cancel."
                        .to_string();
                self.mark_dirty();
            }
            _ => {}
        }
        Ok(false)
    }

    fn handle_search_key(&mut self, code: KeyCode) {
        let Some(input) = self.search_input.as_mut() else {
            return;
        };
        match code {
            KeyCode::Esc => {
                self.search_input = None;
                self.status_message = "Search cancelled.".to_string();
            }
            KeyCode::Enter => {
                let query = SearchQuery::parse(input);
                if query.is_empty() {
                    self.status_message = "Type something to search for.".to_string();
                } else {
                    self.search_input = None;
                    self.start_session(FeedSource::Search(query));
                }
            }
            KeyCode::Backspace => {
                input.pop();
            }
            KeyCode::Char(ch) => input.push(ch),
            _ => {}
        }
        self.mark_dirty();
    }

    fn handle_mouse(&mut self, event: MouseEvent) {
        if self.detail.is_some() || self.search_input.is_some() {
            return;
        }
        match event.kind {
            MouseEventKind::ScrollDown => self.scroll_by(MOUSE_SCROLL_ROWS),
            MouseEventKind::ScrollUp => self.scroll_by(-MOUSE_SCROLL_ROWS),
            _ => {}
        }
    }

    fn open_detail(&mut self) {
        let Some(post_id) = self.selected_post().map(|post| post.id) else {
            return;
        };
        let Some(service) = self.post_service.clone() else {
            self.status_message = "Post details are unavailable.".to_string();
            self.mark_dirty();
            return;
        };
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        self.pending_detail = Some(PendingDetail { request_id });
        self.detail = Some(DetailView::Loading { post_id });
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = service.load_post(post_id);
            let _ = tx.send(AsyncResponse::Detail { request_id, result });
        });
        self.mark_dirty();
    }

    fn open_selected_image(&mut self) {
        let url = match &self.detail {
            Some(DetailView::Ready(detail)) => Some(detail.post.image_url.clone()),
            _ => self.selected_post().map(|post| post.image_url.clone()),
        };
        let Some(url) = url.filter(|url| !url.trim().is_empty()) else {
            return;
        };
        self.status_message = match webbrowser::open(&url) {
            Ok(_) => format!("Opened {}", media::image_label(&url)),
            Err(err) => format!("Failed to open image: {err}"),
        };
        self.mark_dirty();
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let full = frame.size();
        frame.render_widget(Block::default().style(Style::default().bg(COLOR_BG)), full);

        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(full);

        let status_text = if self.is_loading() {
            format!("{} {}", self.spinner.frame(), self.status_message)
                .trim()
                .to_string()
        } else {
            self.status_message.clone()
        };
        let status_line = Paragraph::new(status_text).style(
            Style::default()
                .fg(COLOR_TEXT_PRIMARY)
                .bg(COLOR_PANEL_FOCUSED_BG)
                .add_modifier(Modifier::BOLD),
        );
        frame.render_widget(status_line, layout[0]);

        self.draw_feed(frame, layout[1]);

        let footer = Paragraph::new(self.footer_text())
            .style(
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .bg(COLOR_PANEL_BG)
                    .add_modifier(Modifier::ITALIC),
            )
            .alignment(Alignment::Center);
        frame.render_widget(footer, layout[2]);

        if self.detail.is_some() {
            self.draw_detail(frame, layout[1]);
        }
    }

    fn footer_text(&self) -> String {
        if let Some(input) = &self.search_input {
            return format!("search: {input}▏");
        }
        if self.detail.is_some() {
            return "o: open image · Esc: close".to_string();
        }
        let back = if matches!(self.source, FeedSource::Search(_)) {
            " · Esc: back to feed"
        } else {
            ""
        };
        format!(
            "j/k: move · PgUp/PgDn: scroll · Enter: details · o: open image · /: search · r: refresh{back} · q: quit"
        )
    }

    fn draw_feed(&mut self, frame: &mut Frame<'_>, area: Rect) {
        self.viewport_rows.set(area.height);
        self.scroll_top = self.scroll_top.min(self.max_scroll());

        let view_top = self.scroll_top;
        let view_bottom = view_top + usize::from(area.height);
        let width = usize::from(area.width);
        let mut lines: Vec<Line<'static>> = Vec::new();
        let mut offset = 0;

        for (index, (card, post)) in self.cards.iter().zip(self.feed.items()).enumerate() {
            let height = card.height();
            let card_bottom = offset + height;
            if card_bottom > view_top && offset < view_bottom {
                let card_lines = card_lines(post, card, index == self.selected, width);
                let skip = view_top.saturating_sub(offset);
                let take = view_bottom.min(card_bottom) - offset.max(view_top);
                lines.extend(card_lines.into_iter().skip(skip).take(take));
            }
            offset = card_bottom;
            if offset >= view_bottom {
                break;
            }
        }
        if offset < view_bottom {
            lines.push(self.feed_footer_line(width));
        }

        let feed = Paragraph::new(Text::from(lines)).style(Style::default().bg(COLOR_BG));
        frame.render_widget(feed, area);
    }

    fn feed_footer_line(&self, width: usize) -> Line<'static> {
        let (text, color) = match self.feed.phase() {
            Phase::Fetching { page } => (
                format!("{} loading page {page}…", self.spinner.frame()),
                COLOR_ACCENT,
            ),
            Phase::Ended if self.cards.is_empty() => ("no posts".to_string(), COLOR_TEXT_SECONDARY),
            Phase::Ended => ("· end of feed ·".to_string(), COLOR_SUCCESS),
            Phase::Idle => match &self.last_failure {
                Some(_) => (
                    format!("page {} failed, scroll to retry", self.feed.cursor()),
                    COLOR_ERROR,
                ),
                None => ("scroll for more".to_string(), COLOR_TEXT_SECONDARY),
            },
        };
        Line::from(Span::styled(
            center_width(&text, width),
            Style::default().fg(color),
        ))
    }

    fn draw_detail(&self, frame: &mut Frame<'_>, area: Rect) {
        let popup_area = centered_rect(70, 70, area);
        frame.render_widget(Clear, popup_area);
        let text_width = usize::from(popup_area.width.saturating_sub(4)).max(10);
        let label = Style::default()
            .fg(COLOR_TEXT_SECONDARY)
            .add_modifier(Modifier::BOLD);
        let value = Style::default().fg(COLOR_TEXT_PRIMARY);

        let mut lines: Vec<Line<'static>> = Vec::new();
        let title = match &self.detail {
            Some(DetailView::Loading { post_id }) => {
                lines.push(Line::from(Span::styled(
                    format!("{} loading post #{post_id}…", self.spinner.frame()),
                    Style::default().fg(COLOR_ACCENT),
                )));
                "Post".to_string()
            }
            Some(DetailView::Failed { post_id, message }) => {
                for line in wrap(message, text_width) {
                    lines.push(Line::from(Span::styled(
                        line.into_owned(),
                        Style::default().fg(COLOR_ERROR),
                    )));
                }
                format!("Post #{post_id}")
            }
            Some(DetailView::Ready(detail)) => {
                let post = &detail.post;
                let author = detail
                    .author
                    .as_ref()
                    .map(|user| format!("{} (#{})", user.name, user.id))
                    .unwrap_or_else(|| format!("#{}", post.author_id));
                lines.push(Line::from(vec![
                    Span::styled("Author   ", label),
                    Span::styled(author, value),
                ]));
                lines.push(Line::from(vec![
                    Span::styled("Posted   ", label),
                    Span::styled(format_timestamp(post.created_timestamp), value),
                ]));
                lines.push(Line::from(vec![
                    Span::styled("Image    ", label),
                    Span::styled(post.image_url.clone(), Style::default().fg(COLOR_ACCENT)),
                ]));
                if let Some(card) = self.cards.iter().find(|card| card.post_id == post.id) {
                    let size = match &card.image {
                        ImageState::Loaded(dims) => format!(
                            "{}×{} · {}",
                            dims.width,
                            dims.height,
                            card.slot.class().as_str()
                        ),
                        ImageState::Failed(reason) => {
                            format!("{} · image failed: {reason}", card.slot.class().as_str())
                        }
                        _ => card.slot.class().as_str().to_string(),
                    };
                    lines.push(Line::from(vec![
                        Span::styled("Layout   ", label),
                        Span::styled(size, value),
                    ]));
                }
                lines.push(Line::default());
                let description = if post.description.trim().is_empty() {
                    "No description."
                } else {
                    post.description.trim()
                };
                for line in wrap(description, text_width) {
                    lines.push(Line::from(Span::styled(line.into_owned(), value)));
                }
                if let Some(bio) = detail
                    .author
                    .as_ref()
                    .map(|user| user.bio.trim())
                    .filter(|bio| !bio.is_empty())
                {
                    lines.push(Line::default());
                    for line in wrap(bio, text_width) {
                        lines.push(Line::from(Span::styled(
                            line.into_owned(),
                            Style::default()
                                .fg(COLOR_TEXT_SECONDARY)
                                .add_modifier(Modifier::ITALIC),
                        )));
                    }
                }
                post_title(post)
            }
            None => return,
        };

        let popup = Paragraph::new(Text::from(lines))
            .block(
                Block::default()
                    .title(Span::styled(
                        title,
                        Style::default()
                            .fg(COLOR_ACCENT)
                            .add_modifier(Modifier::BOLD),
                    ))
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(COLOR_ACCENT))
                    .style(Style::default().bg(COLOR_PANEL_BG)),
            )
            .wrap(Wrap { trim: false });
        frame.render_widget(popup, popup_area);
    }
}

/// Renders one card as `card.height()` lines of exactly `width` columns.
fn card_lines(post: &Post, card: &Card, selected: bool, width: usize) -> Vec<Line<'static>> {
    let inner = width.saturating_sub(2);
    let class = card.slot.class();
    let border = Style::default().fg(if selected {
        COLOR_BORDER_FOCUSED
    } else {
        COLOR_BORDER_IDLE
    });
    let title_style = Style::default()
        .fg(COLOR_TEXT_PRIMARY)
        .add_modifier(Modifier::BOLD);
    let muted = Style::default().fg(COLOR_TEXT_SECONDARY);

    let mut lines = Vec::with_capacity(card.height());

    let title = format!(" {} ", post_title(post));
    let title = fit_width(&title, inner.saturating_sub(1)).trim_end().to_string();
    let title_width = UnicodeWidthStr::width(title.as_str());
    let fill = inner.saturating_sub(title_width + 1);
    lines.push(Line::from(vec![
        Span::styled("╭─".to_string(), border),
        Span::styled(title, title_style),
        Span::styled(format!("{}╮", "─".repeat(fill)), border),
    ]));

    let image_rows = usize::from(class.image_rows());
    let (label, label_style) = image_caption(post, card);
    for row in 0..image_rows {
        let content = if row == image_rows / 2 {
            Span::styled(center_width(&label, inner), label_style)
        } else {
            Span::raw(" ".repeat(inner))
        };
        lines.push(Line::from(vec![
            Span::styled("│".to_string(), border),
            content,
            Span::styled("│".to_string(), border),
        ]));
    }

    let meta = format!(" #{} · {} ", post.id, class.as_str());
    lines.push(Line::from(vec![
        Span::styled("│".to_string(), border),
        Span::styled(fit_width(&meta, inner), muted),
        Span::styled("│".to_string(), border),
    ]));
    lines.push(Line::from(Span::styled(
        format!("╰{}╯", "─".repeat(inner)),
        border,
    )));
    lines
}

fn image_caption(post: &Post, card: &Card) -> (String, Style) {
    let name = media::image_label(&post.image_url);
    match &card.image {
        ImageState::Loading => (
            format!("[loading {name}…]"),
            Style::default().fg(COLOR_TEXT_SECONDARY),
        ),
        ImageState::Loaded(dims) => (
            format!("[{name} · {}×{}]", dims.width, dims.height),
            Style::default().fg(COLOR_ACCENT),
        ),
        ImageState::Failed(_) => (
            format!("[image unavailable: {name}]"),
            Style::default().fg(COLOR_ERROR),
        ),
        ImageState::Disabled => (
            format!("[image: {name}]"),
            Style::default().fg(COLOR_TEXT_SECONDARY),
        ),
    }
}
