use std::io::{self, Write};

use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal,
};

use task_status_sync::manager::session::SessionScope;
use task_status_sync::manager::task_store::{StatusTab, TaskFilter};
use task_status_sync::{Notification, NotificationLevel, SyncSession, Task, TaskStatus};

const PROMPT: &str = ">>> ";

pub fn run_cli(mut scope: SessionScope) -> io::Result<()> {
    println!("Task status dashboard. Type 'help' for commands, 'exit' to quit.");
    let mut commands_history: Vec<String> = Vec::new();
    let mut history_index = 0;

    terminal::enable_raw_mode()?;
    let result = loop {
        if let Some(session) = scope.session() {
            print_notifications(session);
        }
        let Some(input) = read_line(&commands_history, &mut history_index)? else {
            continue;
        };
        if !input.trim().is_empty() {
            commands_history.push(input.clone());
        }
        history_index = commands_history.len();

        let mut args = input.split_whitespace();
        match args.next() {
            Some("exit") => {
                print_line("Exiting the program...");
                break Ok(());
            }
            Some("help") => print_help(),
            Some("login") => match args.next() {
                Some(user_id) => {
                    if scope.set_user(Some(user_id)) {
                        print_line(&format!("Signed in as {user_id}. Loading tasks..."));
                    } else {
                        print_line(&format!("Already signed in as {user_id}."));
                    }
                }
                None => print_line("User ID must be specified."),
            },
            Some("logout") => {
                if scope.set_user(None) {
                    print_line("Signed out.");
                } else {
                    print_line("Nobody is signed in.");
                }
            }
            Some(command) => match scope.session() {
                Some(session) => run_session_command(session, command, args.collect()),
                None => print_line("Sign in first: login <user-id>"),
            },
            None => continue,
        }
    };
    terminal::disable_raw_mode()?;
    result
}

fn run_session_command(session: &SyncSession, command: &str, args: Vec<&str>) {
    match command {
        "list" => {
            let mut filter = TaskFilter::default();
            let mut rest = args.as_slice();
            if let Some(tab) = rest.first().and_then(|a| StatusTab::parse(a)) {
                filter.tab = tab;
                rest = &rest[1..];
            } else if let Some(status) = rest.first().and_then(|a| TaskStatus::parse(a)) {
                filter.status = Some(status);
                rest = &rest[1..];
            }
            filter.search = rest.join(" ");
            print_tasks(&session.filtered_tasks(&filter));
        }
        "stats" => {
            let stats = session.stats();
            print_line(&format!(
                "Total {} | Active {} | Queue {} | Processing {} | Completed {} | Failed {}",
                stats.total, stats.active, stats.queue, stats.processing, stats.completed, stats.failed
            ));
        }
        "state" => print_line(&format!("Transport: {:?}", session.transport_state())),
        "retry" | "cancel" | "delete" => {
            let Some(id) = args.first() else {
                print_line("Task ID must be specified.");
                return;
            };
            let sent = match command {
                "retry" => session.retry_task(id),
                "cancel" => session.cancel_task(id),
                _ => session.delete_task(id),
            };
            if sent {
                print_line(&format!("Sent {command} request for task {id}."));
            } else {
                print_line(&format!("Task {id} not found."));
            }
        }
        other => print_line(&format!("Unknown command: {other}. Please try again.")),
    }
}

/// Returns `None` when the line was abandoned (history scrolled past the end).
fn read_line(history: &[String], history_index: &mut usize) -> io::Result<Option<String>> {
    print!("\r{PROMPT}");
    io::stdout().flush()?;

    let mut input = String::new();
    loop {
        let Event::Key(key_event) = event::read()? else {
            continue;
        };
        if key_event.kind == KeyEventKind::Release {
            continue;
        }
        match key_event.code {
            KeyCode::Enter => {
                print!("\r\n");
                return Ok(Some(input));
            }
            KeyCode::Up => {
                if *history_index > 0 {
                    *history_index -= 1;
                }
                if let Some(command) = history.get(*history_index) {
                    input = command.clone();
                    redraw(&input)?;
                }
            }
            KeyCode::Down => {
                if *history_index < history.len() {
                    *history_index += 1;
                }
                if *history_index == history.len() {
                    redraw("")?;
                    return Ok(None);
                }
                if let Some(command) = history.get(*history_index) {
                    input = command.clone();
                    redraw(&input)?;
                }
            }
            KeyCode::Char(c) => {
                input.push(c);
                print!("{c}");
                io::stdout().flush()?;
            }
            KeyCode::Backspace => {
                input.pop();
                redraw(&input)?;
            }
            _ => {}
        }
    }
}

fn redraw(input: &str) -> io::Result<()> {
    execute!(
        io::stdout(),
        cursor::MoveToColumn(0),
        terminal::Clear(terminal::ClearType::CurrentLine)
    )?;
    print!("{PROMPT}{input}");
    io::stdout().flush()
}

fn print_line(text: &str) {
    print!("\r{text}\r\n");
}

fn print_help() {
    for line in [
        "login <user-id>            sign in and start syncing",
        "logout                     stop syncing and drop the task list",
        "list [tab|status] [text]   tabs: all active completed failed",
        "stats                      counts per status",
        "state                      which transport is live",
        "retry|cancel|delete <id>   act on a task",
        "exit",
    ] {
        print_line(line);
    }
}

fn print_notifications(session: &SyncSession) {
    for notification in session.notifications().try_iter() {
        print_line(&format_notification(&notification));
    }
}

fn format_notification(notification: &Notification) -> String {
    let tag = match notification.level {
        NotificationLevel::Info => "info",
        NotificationLevel::Success => " ok ",
        NotificationLevel::Error => "fail",
    };
    let mut text = format!("[{tag}] {}", notification.title);
    if let Some(description) = &notification.description {
        text.push_str(&format!(" ({description})"));
    }
    if let Some(action) = &notification.action {
        text.push_str(&format!(" -> {}: {}", action.label, action.target));
    }
    text
}

fn print_tasks(tasks: &[Task]) {
    if tasks.is_empty() {
        print_line("No jobs found");
        return;
    }
    print_line(&format!("{:<38} {:<11} {:<28} {}", "ID", "Status", "Service", "Created"));
    print_line(&"-".repeat(96));
    for task in tasks {
        let created = task
            .created_at
            .map(|at| at.format("%b %d, %Y %H:%M").to_string())
            .unwrap_or_else(|| "N/A".to_string());
        print_line(&format!(
            "{:<38} {:<11} {:<28} {}",
            task.id,
            task.status.as_str(),
            task.display_name(),
            created
        ));
        if task.status == TaskStatus::Failed {
            if let Some(message) = &task.error_message {
                print_line(&format!("    error: {message}"));
            }
        }
        if let Some(secs) = task.processing_secs().filter(|_| task.status == TaskStatus::Completed) {
            print_line(&format!("    processing time: {secs:.2}s"));
        }
    }
}
