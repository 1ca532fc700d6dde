use crate::{
    betting::BetOption,
    controller::AppSnapshot,
    format::{
        explorer_tx_url,
        format_amount,
        format_amount_fixed2,
        short_hex,
    },
    outcome::Settlement,
    session::Phase,
};
use color_eyre::eyre::Result;
use crossterm::event::{
    self,
    Event,
    KeyCode,
    KeyEvent,
    KeyEventKind,
};
use crossterm::terminal::{
    disable_raw_mode,
    enable_raw_mode,
};
use ratatui::prelude::*;
use ratatui::widgets::*;
use std::io::stdout;
use tokio::sync::mpsc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UserEvent {
    Quit,
    Redraw,
    DismissAlert,
    Connect,
    SwitchNetwork,
    NextBet,
    PrevBet,
    Flip,
    Withdraw(String),
    WithdrawAll,
    /// Moves the simulated wallet on or off the game network.
    HopChain,
}

#[derive(Debug, Default)]
pub struct UiState {
    mode: Mode,
    alert_open: bool,
    phase: Phase,
    is_owner: bool,
    terminal: Option<Terminal<CrosstermBackend<std::io::Stdout>>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
enum Mode {
    #[default]
    Normal,
    WithdrawModal(WithdrawState),
    QuitModal,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct WithdrawState {
    amount: String,
}

pub fn terminal_enter(state: &mut UiState) -> Result<()> {
    enable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), crossterm::terminal::EnterAlternateScreen)?;
    // Create a single persistent Terminal to preserve buffers across draws
    let backend = CrosstermBackend::new(stdout());
    let terminal = Terminal::new(backend)?;
    state.terminal = Some(terminal);
    Ok(())
}

pub fn terminal_exit() -> Result<()> {
    disable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), crossterm::terminal::LeaveAlternateScreen)?;
    Ok(())
}

/// Terminal events read on a dedicated thread. The channel closes after the
/// first read error, which is forwarded.
pub fn input_events() -> mpsc::UnboundedReceiver<std::io::Result<Event>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        loop {
            let ev = event::read();
            let failed = ev.is_err();
            if tx.send(ev).is_err() || failed {
                break;
            }
        }
    });
    rx
}

pub fn draw(state: &mut UiState, snap: &AppSnapshot) -> Result<()> {
    // cache what key handling depends on
    state.alert_open = snap.alert.is_some();
    state.phase = snap.phase;
    state.is_owner = snap.is_owner;
    if !state.is_owner && matches!(state.mode, Mode::WithdrawModal(_)) {
        state.mode = Mode::Normal;
    }
    if let Some(mut term) = state.terminal.take() {
        term.draw(|f| ui(f, state, snap))?;
        state.terminal = Some(term);
    }
    Ok(())
}

/// Maps a raw terminal event onto a controller action. `None` means the
/// event is irrelevant and nothing needs redrawing.
pub fn interpret_event(state: &mut UiState, ev: Event) -> Option<UserEvent> {
    let Event::Key(k) = ev else {
        return matches!(ev, Event::Resize(..)).then_some(UserEvent::Redraw);
    };
    if k.kind != KeyEventKind::Press {
        return None;
    }
    if state.alert_open {
        state.alert_open = false;
        return Some(UserEvent::DismissAlert);
    }
    match &mut state.mode {
        Mode::WithdrawModal(ws) => {
            if k.code == KeyCode::Esc {
                state.mode = Mode::Normal;
                return Some(UserEvent::Redraw);
            }
            return withdraw_key(ws, k).or(Some(UserEvent::Redraw));
        }
        Mode::QuitModal => {
            return match k.code {
                KeyCode::Char('y') | KeyCode::Char('Y') => Some(UserEvent::Quit),
                KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                    state.mode = Mode::Normal;
                    Some(UserEvent::Redraw)
                }
                _ => None,
            };
        }
        Mode::Normal => {}
    }
    match k.code {
        KeyCode::Char('q') | KeyCode::Esc => {
            state.mode = Mode::QuitModal;
            Some(UserEvent::Redraw)
        }
        KeyCode::Char('c') if state.phase == Phase::Disconnected => Some(UserEvent::Connect),
        KeyCode::Char('n') if state.phase == Phase::WrongNetwork => Some(UserEvent::SwitchNetwork),
        KeyCode::Right => Some(UserEvent::NextBet),
        KeyCode::Left => Some(UserEvent::PrevBet),
        KeyCode::Enter | KeyCode::Char('f') => Some(UserEvent::Flip),
        KeyCode::Char('w') if state.is_owner => {
            state.mode = Mode::WithdrawModal(WithdrawState::default());
            Some(UserEvent::Redraw)
        }
        KeyCode::Char('W') if state.is_owner => Some(UserEvent::WithdrawAll),
        KeyCode::Char('x') => Some(UserEvent::HopChain),
        _ => None,
    }
}

/// Edits the withdraw field. The typed amount survives a failed withdraw;
/// see [`withdraw_succeeded`].
fn withdraw_key(ws: &mut WithdrawState, k: KeyEvent) -> Option<UserEvent> {
    match k.code {
        KeyCode::Enter => Some(UserEvent::Withdraw(ws.amount.clone())),
        KeyCode::Backspace => {
            ws.amount.pop();
            None
        }
        KeyCode::Char(c) if c.is_ascii_digit() || c == '.' => {
            ws.amount.push(c);
            None
        }
        _ => None,
    }
}

/// Closes the withdraw modal and drops its text.
pub fn withdraw_succeeded(state: &mut UiState) {
    if matches!(state.mode, Mode::WithdrawModal(_)) {
        state.mode = Mode::Normal;
    }
}

fn ui(f: &mut Frame, state: &UiState, snap: &AppSnapshot) {
    f.render_widget(Clear, f.area());
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4), // header
            Constraint::Min(7),    // bets or connect prompt
            Constraint::Length(5), // last flip
            Constraint::Length(7), // errors
            Constraint::Length(3), // help
        ])
        .split(f.area());

    draw_header(f, chunks[0], snap);
    draw_body(f, chunks[1], snap);
    draw_result(f, chunks[2], snap);
    draw_errors(f, chunks[3], snap);
    draw_help(f, chunks[4], snap);
    draw_modals(f, state, snap);
}

fn account_label(snap: &AppSnapshot) -> String {
    match snap.account {
        Some(account) => {
            let balance = snap
                .user_balance
                .amount()
                .map(format_amount_fixed2)
                .unwrap_or_else(|| String::from("?"));
            format!(
                "{} | {} {}",
                short_hex(&account.to_string()),
                balance,
                snap.currency_symbol
            )
        }
        None => String::from("Not Connected"),
    }
}

fn draw_header(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let dealer = snap
        .dealer_balance
        .amount()
        .map(format_amount_fixed2)
        .unwrap_or_else(|| String::from("?"));
    let owner = if snap.is_owner { " | owner" } else { "" };
    let header = Paragraph::new(format!(
        "{} | Dealer: {} {} | {}{}\n{}",
        account_label(snap),
        dealer,
        snap.currency_symbol,
        snap.phase,
        owner,
        snap.status
    ))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!("Coin Flip - {}", snap.chain_name)),
    );
    f.render_widget(header, area);
}

fn bet_line(option: &BetOption, selected: bool, symbol: &str) -> Line<'static> {
    let cur = if selected { ">" } else { " " };
    let label = format!("{cur} {} {symbol}", format_amount(option.amount));
    match option.eligibility.reason() {
        None if selected => Line::styled(
            label,
            Style::default().fg(Color::Black).bg(Color::Yellow),
        ),
        None => Line::from(label),
        Some(reason) => Line::styled(
            format!("{label}  ({})", reason.hint()),
            Style::default().fg(Color::DarkGray),
        ),
    }
}

fn draw_body(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let mut lines: Vec<Line> = Vec::new();
    match snap.phase {
        Phase::Disconnected => {
            lines.push(Line::from("Wallet not connected."));
            lines.push(Line::from("Press c to connect."));
        }
        Phase::WrongNetwork => {
            let current = snap
                .chain_id
                .map(|id| format!("{id:#x}"))
                .unwrap_or_else(|| String::from("unknown"));
            lines.push(Line::from(format!(
                "Wallet is on chain {current}; the game runs on {} ({:#x}).",
                snap.chain_name, snap.target_chain_id
            )));
            lines.push(Line::from("Press n to switch network."));
        }
        _ => {
            for option in snap.options.iter().filter(|o| o.visible) {
                lines.push(bet_line(
                    option,
                    option.amount == snap.selected_bet,
                    &snap.currency_symbol,
                ));
            }
            lines.push(Line::from(""));
            let action = if snap.phase == Phase::Flipping {
                String::from("Flipping...")
            } else {
                format!(
                    "Enter: flip {} {}",
                    format_amount(snap.selected_bet),
                    snap.currency_symbol
                )
            };
            lines.push(Line::styled(action, Style::default().add_modifier(Modifier::BOLD)));
        }
    }
    let body = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Bet"));
    f.render_widget(body, area);
}

fn settlement_line(settlement: &Settlement, symbol: &str) -> Line<'static> {
    match settlement {
        Settlement::Won { .. } => {
            Line::styled(settlement.message(symbol), Style::default().fg(Color::Green))
        }
        Settlement::Lost => {
            Line::styled(settlement.message(symbol), Style::default().fg(Color::Red))
        }
        Settlement::Unknown { .. } => Line::styled(
            "Outcome unknown (tx submitted)",
            Style::default().fg(Color::Yellow),
        ),
    }
}

fn draw_result(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let mut lines: Vec<Line> = Vec::new();
    match &snap.settlement {
        Some(settlement) => {
            let mut line = settlement_line(settlement, &snap.currency_symbol);
            if let Some(at) = snap.settled_at {
                line.push_span(Span::raw(format!("  at {}", at.format("%H:%M:%S"))));
            }
            lines.push(line);
        }
        None if snap.phase == Phase::Flipping => lines.push(Line::from("Waiting for settlement...")),
        None => lines.push(Line::from("No flips yet")),
    }
    if let Some(tx) = snap.last_tx {
        let hash = tx.to_string();
        lines.push(Line::from(format!("Tx: {}", short_hex(&hash))));
        lines.push(Line::from(explorer_tx_url(&snap.explorer_url, &hash)));
    }
    let result = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Last Flip"));
    f.render_widget(result, area);
}

fn draw_errors(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let mut lines: Vec<Line> = Vec::new();
    if snap.errors.is_empty() {
        lines.push(Line::from("No errors"));
    } else {
        for e in &snap.errors {
            lines.push(Line::from(e.clone()));
        }
    }
    let color = if snap.errors.is_empty() { Color::DarkGray } else { Color::Red };
    let errors = Paragraph::new(lines)
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL).title("Errors"));
    f.render_widget(errors.style(Style::default().fg(color)), area);
}

fn draw_help(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let mut keys = String::from("c connect | n switch network | ←/→ bet | Enter/f flip");
    if snap.is_owner {
        keys.push_str(" | w withdraw | W withdraw all");
    }
    keys.push_str(" | x hop chain | q/Esc quit");
    let help = Paragraph::new(keys).block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(help, area);
}

fn draw_modals(f: &mut Frame, state: &UiState, snap: &AppSnapshot) {
    if let Some(alert) = &snap.alert {
        let area = centered_rect(50, 20, f.area());
        let block = Block::default().borders(Borders::ALL).title("Alert");
        let p = Paragraph::new(format!("{alert}\n\nPress any key"))
            .wrap(Wrap { trim: true });
        f.render_widget(Clear, area);
        f.render_widget(block.clone(), area);
        f.render_widget(p, block.inner(area));
        return;
    }
    match &state.mode {
        Mode::WithdrawModal(ws) => {
            let area = centered_rect(40, 25, f.area());
            let block = Block::default().borders(Borders::ALL).title("Withdraw");
            let p = Paragraph::new(format!(
                "Amount: {} {}\nEnter=confirm Esc=cancel digits/. to edit",
                ws.amount, snap.currency_symbol
            ));
            f.render_widget(Clear, area);
            f.render_widget(block.clone(), area);
            f.render_widget(p, block.inner(area));
        }
        Mode::QuitModal => {
            let area = centered_rect(40, 20, f.area());
            let block = Block::default().borders(Borders::ALL).title("Confirm Quit");
            let p = Paragraph::new("Quit the game? (Y/N)");
            f.render_widget(Clear, area);
            f.render_widget(block.clone(), area);
            f.render_widget(p, block.inner(area));
        }
        Mode::Normal => {}
    }
}

fn centered_rect(w_percent: u16, h_percent: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - h_percent) / 2),
            Constraint::Percentage(h_percent),
            Constraint::Percentage((100 - h_percent) / 2),
        ])
        .split(r);

    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - w_percent) / 2),
            Constraint::Percentage(w_percent),
            Constraint::Percentage((100 - w_percent) / 2),
        ])
        .split(popup_layout[1]);

    horizontal[1]
}
