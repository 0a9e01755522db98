//! Terminal loops for the text practice modes.

use std::io::{BufRead, Write};

use anyhow::Context;
use devtalk_core::tutor::{find_scenario, split_correction, SCENARIOS};
use tracing::{debug, warn};

use crate::text_client::{fetch_vocabulary, ChatMessage, ChatSession, GenerateContent};

fn read_line(input: &mut impl BufRead) -> anyhow::Result<Option<String>> {
    let mut line = String::new();
    if input.read_line(&mut line).context("failed to read stdin")? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

fn print_reply(out: &mut impl Write, message: &ChatMessage) -> std::io::Result<()> {
    debug!(id = %message.id, "model reply");
    let (reply, correction) = split_correction(&message.text);
    writeln!(out, "tutor [{}]> {reply}", message.timestamp.format("%H:%M"))?;
    if let Some(note) = correction {
        writeln!(out, "       Correction: {note}")?;
    }
    Ok(())
}

/// Asks for a scenario until one matches. `None` on EOF.
pub fn choose_scenario(
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> anyhow::Result<Option<&'static str>> {
    writeln!(out, "Choose a scenario:")?;
    for (i, name) in SCENARIOS.iter().enumerate() {
        writeln!(out, "  {}. {}", i + 1, name)?;
    }
    loop {
        write!(out, "scenario> ")?;
        out.flush()?;
        let Some(line) = read_line(input)? else {
            return Ok(None);
        };
        match find_scenario(&line) {
            Some(scenario) => return Ok(Some(scenario)),
            None => writeln!(out, "No scenario matches '{line}'.")?,
        }
    }
}

/// Role-play until `/quit` or EOF. `/restart` reopens the same scenario.
pub fn run_scenario<C: GenerateContent + Clone>(
    client: C,
    scenario: &str,
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    writeln!(out, "== {scenario} ==  (/restart, /quit)")?;
    let mut session = ChatSession::start(client.clone(), scenario)?;
    if let Some(first) = session.messages().first() {
        print_reply(out, first)?;
    }

    loop {
        write!(out, "you> ")?;
        out.flush()?;
        let Some(line) = read_line(input)? else {
            break;
        };
        match line.as_str() {
            "" => continue,
            "/quit" => break,
            "/restart" => {
                session = ChatSession::start(client.clone(), scenario)?;
                writeln!(out, "== {} (restarted) ==", session.scenario())?;
                if let Some(first) = session.messages().first() {
                    print_reply(out, first)?;
                }
            }
            text => match session.send(text) {
                Ok(reply) => print_reply(out, reply)?,
                Err(e) => {
                    warn!(error = %e, "chat turn failed");
                    writeln!(out, "error: {e:#}")?;
                }
            },
        }
    }
    Ok(())
}

/// Steps through batches of cards. Enter reveals, Enter again advances,
/// `q` quits. The last card of a batch fetches a fresh batch.
pub fn run_vocabulary(
    client: &impl GenerateContent,
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    loop {
        writeln!(out, "Fetching new cards...")?;
        let items = match fetch_vocabulary(client) {
            Ok(items) if !items.is_empty() => items,
            Ok(_) => {
                writeln!(out, "No cards returned. Enter to try again, q to quit.")?;
                if wants_quit(input)? {
                    return Ok(());
                }
                continue;
            }
            Err(e) => {
                warn!(error = %e, "vocabulary fetch failed");
                writeln!(out, "error: {e:#}\nEnter to try again, q to quit.")?;
                if wants_quit(input)? {
                    return Ok(());
                }
                continue;
            }
        };

        let total = items.len();
        for (i, item) in items.iter().enumerate() {
            writeln!(out, "\n[{}/{}] {}", i + 1, total, item.term)?;
            write!(out, "(Enter to reveal) ")?;
            out.flush()?;
            if wants_quit(input)? {
                return Ok(());
            }
            writeln!(out, "  {}", item.definition)?;
            writeln!(out, "  \"{}\"", item.example)?;
            let prompt = if i + 1 == total {
                "(Enter for next set) "
            } else {
                "(Enter for next word) "
            };
            write!(out, "{prompt}")?;
            out.flush()?;
            if wants_quit(input)? {
                return Ok(());
            }
        }
    }
}

fn wants_quit(input: &mut impl BufRead) -> anyhow::Result<bool> {
    Ok(match read_line(input)? {
        None => true,
        Some(line) => line.eq_ignore_ascii_case("q") || line == "/quit",
    })
}
