use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
    Frame,
};

fn keybind(key: &'static str, pad: usize, what: &'static str) -> Line<'static> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(key, Style::default().fg(Color::Magenta)),
        Span::raw(" ".repeat(pad)),
        Span::raw(what),
    ])
}

/// Centered help overlay drawn on top of the window.
pub fn draw_help(area: Rect, f: &mut Frame) {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Fill(1),
            Constraint::Length(10),
            Constraint::Fill(1),
        ])
        .split(area);
    let popup = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Fill(1),
            Constraint::Length(48),
            Constraint::Fill(1),
        ])
        .split(vertical[1])[1];

    let p = Paragraph::new(vec![
        Line::from("Keybinds:"),
        keybind("q / Esc", 5, "Close window"),
        keybind("Ctrl-C", 6, "Quit and stop the backend"),
        keybind("c / y", 7, "Copy backend URL"),
        keybind("?", 11, "Toggle this help"),
        Line::from(""),
        Line::from("Closed windows come back on SIGUSR1 when resident."),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));

    f.render_widget(Clear, popup);
    f.render_widget(p, popup);
}
