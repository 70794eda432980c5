//! Live TUI dashboard for a single registered server: container state via
//! the Reconciler and host resource usage via the Metric Sampler, polled
//! on an interval over one long-lived SSH session.

use std::io;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::event::{Event, EventStream, KeyCode, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use futures::StreamExt;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Paragraph, Row, Table};
use ratatui::Frame;

use crate::core::Core;
use crate::db::repo;
use crate::metrics::{self, ServerSample};
use crate::reconcile::{self, ContainerState};
use crate::ssh::SshSession;

struct DashState {
    server_name: String,
    containers: Vec<ContainerState>,
    sample: ServerSample,
    error: Option<String>,
    last_update: String,
}

async fn poll(session: &SshSession, app_dirs: &[(String, String)], state: &mut DashState) {
    let mut containers = Vec::new();
    for (_, dir) in app_dirs {
        match reconcile::container_states(session, dir).await {
            Ok(mut c) => containers.append(&mut c),
            Err(e) => {
                state.error = Some(e.to_string());
            }
        }
    }
    state.containers = containers;

    match metrics::sample_server(session).await {
        Ok(sample) => {
            state.sample = sample;
            state.error = None;
        }
        Err(e) => state.error = Some(e.to_string()),
    }

    state.last_update = chrono::Local::now().format("%H:%M:%S").to_string();
}

fn pct(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.1}%")).unwrap_or_else(|| "-".to_string())
}

fn ui(frame: &mut Frame, state: &DashState) {
    let area = frame.area();
    let title_left = format!(" dockhand monitor — {} ", state.server_name);
    let title_right = format!(" updated {} ", state.last_update);
    let block = Block::default()
        .borders(Borders::ALL)
        .title(Line::from(vec![Span::styled(
            title_left,
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        )]))
        .title(
            Line::from(vec![Span::styled(title_right, Style::default().fg(Color::DarkGray))])
                .alignment(ratatui::layout::Alignment::Right),
        );
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(3), Constraint::Length(1)])
        .split(inner);

    let summary = format!(
        "cpu {}   mem {}   disk {}",
        pct(state.sample.cpu_percent),
        pct(state.sample.mem_percent),
        pct(state.sample.disk_percent)
    );
    frame.render_widget(Paragraph::new(summary), chunks[0]);

    let header = Row::new(vec!["container", "state", "status", "image", "health"])
        .style(Style::default().add_modifier(Modifier::BOLD));
    let rows: Vec<Row> = state
        .containers
        .iter()
        .map(|c| {
            let color = if c.state == "running" { Color::Green } else { Color::Red };
            Row::new(vec![
                Cell::from(c.name.clone()),
                Cell::from(c.state.clone()).style(Style::default().fg(color)),
                Cell::from(c.status.clone()),
                Cell::from(c.image.clone()),
                Cell::from(c.health.clone()),
            ])
        })
        .collect();
    let table = Table::new(
        rows,
        [
            Constraint::Length(28),
            Constraint::Length(10),
            Constraint::Length(18),
            Constraint::Length(26),
            Constraint::Min(10),
        ],
    )
    .header(header);
    frame.render_widget(table, chunks[1]);

    let footer = state.error.clone().unwrap_or_else(|| "q / Esc to quit".to_string());
    frame.render_widget(Paragraph::new(footer).style(Style::default().fg(Color::DarkGray)), chunks[2]);
}

pub async fn run(server_name: String, interval: u64) -> Result<()> {
    let core = Core::bootstrap().await?;
    let server = repo::get_server_by_name(&core.pool, &server_name).await?;
    let apps = repo::list_apps(&core.pool, Some(server.id)).await?;
    let app_dirs: Vec<(String, String)> = apps
        .iter()
        .filter(|a| !a.is_database())
        .map(|a| (a.name.clone(), format!("{}/apps/{}", core.config.remote_base_dir, a.name)))
        .collect();

    let session = SshSession::connect(
        &server.ssh_user,
        &server.host_address,
        Some(server.ssh_port as u16),
        server.ssh_key_path.as_deref().map(Path::new),
    )
    .await
    .with_context(|| format!("failed to connect to {}", server.host_address))?;

    let mut state = DashState {
        server_name: server.name.clone(),
        containers: Vec::new(),
        sample: ServerSample::default(),
        error: None,
        last_update: "...".to_string(),
    };

    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        original_hook(info);
    }));

    enable_raw_mode()?;
    execute!(io::stdout(), EnterAlternateScreen)?;
    let mut terminal = ratatui::init();

    poll(&session, &app_dirs, &mut state).await;

    let mut event_stream = EventStream::new();
    let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
    ticker.tick().await;

    loop {
        terminal.draw(|f| ui(f, &state))?;

        tokio::select! {
            _ = ticker.tick() => {
                poll(&session, &app_dirs, &mut state).await;
            }
            Some(Ok(event)) = event_stream.next() => {
                if let Event::Key(key) = event {
                    if key.kind == KeyEventKind::Press && matches!(key.code, KeyCode::Char('q') | KeyCode::Esc) {
                        break;
                    }
                }
            }
        }
    }

    disable_raw_mode()?;
    execute!(io::stdout(), LeaveAlternateScreen)?;
    ratatui::restore();
    session.close().await.ok();

    Ok(())
}
