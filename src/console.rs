//! # Console Monitor
//!
//! Terminal front-end for a configured system: single-step or free-run the
//! engine and watch traced pins and diagnostics as they come in.
//!
//! ## Keys
//! - `space` advance one tick
//! - `r` toggle free-running
//! - `s` stop free-running
//! - `h` toggle help
//! - `q` / `Esc` quit

use std::io;
use std::time::{Duration, Instant};

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame, Terminal,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::system_config::ConfiguredSystem;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub refresh_rate_ms: u64,
    /// Ticks executed per refresh while free-running.
    pub ticks_per_frame: u64,
    /// Number of most recent diagnostics shown.
    pub max_diagnostics: usize,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            refresh_rate_ms: 100,
            ticks_per_frame: 1,
            max_diagnostics: 12,
        }
    }
}

pub struct ConsoleApp<'a> {
    system: &'a mut ConfiguredSystem,
    config: ConsoleConfig,
    running: bool,
    free_running: bool,
    show_help: bool,
}

impl<'a> ConsoleApp<'a> {
    pub fn new(system: &'a mut ConfiguredSystem, config: ConsoleConfig) -> Self {
        Self {
            system,
            config,
            running: false,
            free_running: false,
            show_help: false,
        }
    }

    pub fn is_free_running(&self) -> bool {
        self.free_running
    }

    pub fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        enable_raw_mode().map_err(|e| format!("Failed to enable raw mode: {}", e))?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)
            .map_err(|e| format!("Failed to enter alternate screen: {}", e))?;

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        self.running = true;
        let refresh = Duration::from_millis(self.config.refresh_rate_ms);
        let mut last_draw: Option<Instant> = None;

        while self.running {
            if event::poll(Duration::from_millis(10))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_key_event(key.code);
                    }
                }
            }

            if last_draw.map_or(true, |at| at.elapsed() >= refresh) {
                if self.free_running {
                    self.advance(self.config.ticks_per_frame);
                }
                terminal.draw(|f| self.draw_ui(f))?;
                last_draw = Some(Instant::now());
            }
        }

        disable_raw_mode().map_err(|e| format!("Failed to disable raw mode: {}", e))?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)
            .map_err(|e| format!("Failed to leave alternate screen: {}", e))?;
        terminal
            .show_cursor()
            .map_err(|e| format!("Failed to show cursor: {}", e))?;
        Ok(())
    }

    fn advance(&mut self, ticks: u64) {
        let executed = self.system.engine.run(ticks);
        if self.system.engine.is_halted() {
            info!(tick = self.system.engine.current_tick(), "engine halted");
            self.free_running = false;
        }
        debug!(executed, "console advance");
    }

    fn handle_key_event(&mut self, key: KeyCode) {
        match key {
            KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => {
                self.running = false;
            }
            KeyCode::Char('h') | KeyCode::Char('H') => {
                self.show_help = !self.show_help;
            }
            _ if self.show_help => {
                self.show_help = false;
            }
            KeyCode::Char('r') | KeyCode::Char('R') => {
                self.free_running = !self.free_running;
                if self.free_running {
                    self.system.engine.resume();
                }
            }
            KeyCode::Char('s') | KeyCode::Char('S') => {
                self.free_running = false;
            }
            KeyCode::Char(' ') => {
                self.free_running = false;
                self.system.engine.tick();
            }
            _ => {}
        }
    }

    fn status_line(&self) -> String {
        let engine = &self.system.engine;
        let mode = if engine.is_halted() {
            "halted"
        } else if self.free_running {
            "running"
        } else {
            "stopped"
        };
        let (setup, hold) = engine.violations();
        format!(
            "tick {}  |  {}  |  diagnostics {}  |  setup {}  hold {}",
            engine.current_tick(),
            mode,
            engine.diagnostics().len(),
            setup,
            hold
        )
    }

    fn watch_lines(&self) -> Vec<Line<'static>> {
        let engine = &self.system.engine;
        if self.system.watched.is_empty() {
            return vec![Line::from("no watched pins")];
        }
        self.system
            .watched
            .iter()
            .map(|watch| {
                let text = match engine.signal(watch.board, watch.component, &watch.pin) {
                    Ok(signal) => format!("{:<20} {:#06x}  {}", watch.label, signal.value, signal.state),
                    Err(_) => format!("{:<20} --", watch.label),
                };
                Line::from(text)
            })
            .collect()
    }

    fn diagnostic_lines(&self) -> Vec<Line<'static>> {
        let records = self.system.engine.diagnostics().records();
        let start = records.len().saturating_sub(self.config.max_diagnostics);
        records[start..]
            .iter()
            .map(|d| {
                let color = if d.kind.is_fatal() { Color::Red } else { Color::Yellow };
                Line::from(vec![
                    Span::styled(format!("{:>6} ", d.tick), Style::default().fg(Color::DarkGray)),
                    Span::styled(format!("{:<28}", d.kind.as_str()), Style::default().fg(color)),
                    Span::raw(d.message.clone()),
                ])
            })
            .collect()
    }

    fn draw_ui(&self, f: &mut Frame) {
        if self.show_help {
            self.draw_help_screen(f);
            return;
        }

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(4), Constraint::Min(8)])
            .split(f.size());

        let title_text = vec![
            Line::from(vec![Span::styled(
                format!("pinvm: {}", self.system.name),
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            )]),
            Line::from(vec![
                Span::raw(self.status_line()),
                Span::raw("   "),
                Span::styled("space", Style::default().fg(Color::Yellow)),
                Span::raw("=step "),
                Span::styled("r", Style::default().fg(Color::Yellow)),
                Span::raw("=run "),
                Span::styled("h", Style::default().fg(Color::Yellow)),
                Span::raw("=help "),
                Span::styled("q", Style::default().fg(Color::Yellow)),
                Span::raw("=quit"),
            ]),
        ];
        let title = Paragraph::new(title_text)
            .block(Block::default().borders(Borders::ALL).title("Status"))
            .wrap(Wrap { trim: true });
        f.render_widget(title, chunks[0]);

        let content = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
            .split(chunks[1]);
        self.draw_pane(f, content[0], "Watched Signals", self.watch_lines());
        self.draw_pane(f, content[1], "Diagnostics", self.diagnostic_lines());
    }

    fn draw_pane(&self, f: &mut Frame, area: Rect, title: &str, lines: Vec<Line<'static>>) {
        let widget = Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL).title(title.to_string()))
            .wrap(Wrap { trim: false });
        f.render_widget(widget, area);
    }

    fn draw_help_screen(&self, f: &mut Frame) {
        let key = |k: &str, what: &str| {
            Line::from(vec![
                Span::styled(format!("  {:<8}", k), Style::default().fg(Color::Yellow)),
                Span::raw(what.to_string()),
            ])
        };
        let help_text = vec![
            Line::from(vec![Span::styled(
                "pinvm console help",
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            )]),
            Line::from(""),
            key("space", "advance one tick"),
            key("r", "start/stop free-running"),
            key("s", "stop free-running"),
            key("h", "show/hide this help"),
            key("q, Esc", "quit"),
            Line::from(""),
            Line::from("Press any key to return to main view..."),
        ];
        let help = Paragraph::new(help_text)
            .wrap(Wrap { trim: true })
            .block(Block::default().borders(Borders::ALL).title("Help"));
        let area = f.size();
        f.render_widget(help, area);
    }
}

pub fn run_console(
    system: &mut ConfiguredSystem,
    config: ConsoleConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut app = ConsoleApp::new(system, config);
    app.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system_config::SystemFactory;

    fn system() -> ConfiguredSystem {
        let json = r#"{"name": "t", "boards": [{"name": "main",
            "components": [{"type": "tie", "name": "VCC", "properties": {"level": "high"}},
                           {"type": "probe", "name": "P"}],
            "connections": [{"source": {"component": "VCC", "pin": "OUT"},
                             "targets": [{"component": "P", "pin": "IN"}]}],
            "watch": [{"component": "P", "pin": "IN"}]}]}"#;
        let mut system = SystemFactory::new().create_from_str(json).unwrap();
        system.engine.init().unwrap();
        system
    }

    #[test]
    fn test_step_and_run_keys() {
        let mut system = system();
        let mut app = ConsoleApp::new(&mut system, ConsoleConfig::default());
        app.handle_key_event(KeyCode::Char(' '));
        app.handle_key_event(KeyCode::Char(' '));
        assert_eq!(app.system.engine.current_tick(), 2);

        app.handle_key_event(KeyCode::Char('r'));
        assert!(app.is_free_running());
        app.advance(3);
        assert_eq!(app.system.engine.current_tick(), 5);
        app.handle_key_event(KeyCode::Char('s'));
        assert!(!app.is_free_running());
    }

    #[test]
    fn test_help_swallows_next_key() {
        let mut system = system();
        let mut app = ConsoleApp::new(&mut system, ConsoleConfig::default());
        app.handle_key_event(KeyCode::Char('h'));
        assert!(app.show_help);
        app.handle_key_event(KeyCode::Char(' '));
        assert!(!app.show_help);
        assert_eq!(app.system.engine.current_tick(), 0);
    }

    #[test]
    fn test_watch_lines_show_values() {
        let mut system = system();
        let app = ConsoleApp::new(&mut system, ConsoleConfig::default());
        let lines = app.watch_lines();
        assert_eq!(lines.len(), 1);
        assert!(app.status_line().starts_with("tick 0"));
    }
}
