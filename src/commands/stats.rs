//! Statistics report.

use super::{open_database, select_keyboard, CommandResult};
use anyhow::bail;
use std::fmt::Write as _;
use std::path::Path;
use typestat::config::{Config, KeyboardConfig};
use typestat::store::{today, Day, StoreError, StreakCount, UsageStore};
use typestat_keyboard::keycode::held_modifiers;
use typestat_keyboard::keycode_label;

/// Print today's counters for one or every configured keyboard
pub fn stats(
    config: &Config,
    database: Option<&Path>,
    keyboard: Option<&str>,
    top: usize,
) -> CommandResult {
    let path = config.database_path(database);
    if !path.exists() {
        bail!("No database at {} (start the daemon first)", path.display());
    }
    let store = open_database(&path)?;

    let keyboards: Vec<&KeyboardConfig> = match keyboard {
        Some(_) => vec![select_keyboard(config, keyboard)?],
        None => config.keyboards.iter().collect(),
    };
    let day = today();
    for kb in keyboards {
        print!("{}", render(&store, &kb.name, day, top)?);
    }
    Ok(())
}

/// `LSft+A` style label for a key pressed with `mods` held
fn chord_label(keycode: u16, mods: u8) -> String {
    held_modifiers(mods)
        .into_iter()
        .chain(std::iter::once(keycode))
        .map(keycode_label)
        .collect::<Vec<_>>()
        .join("+")
}

fn render_histogram<B: std::fmt::Display>(out: &mut String, title: &str, rows: &[StreakCount<B>]) {
    let _ = writeln!(out, "  {title}:");
    if rows.is_empty() {
        let _ = writeln!(out, "    (none)");
    }
    for row in rows {
        let _ = writeln!(
            out,
            "    {:<6} streak {:>3}  x{}",
            row.bucket, row.streak, row.count
        );
    }
}

/// One keyboard's report for `day`
fn render(
    store: &dyn UsageStore,
    keyboard: &str,
    day: Day,
    top: usize,
) -> Result<String, StoreError> {
    let mut records = store.records(keyboard, day)?;
    records.sort_by(|a, b| b.count.cmp(&a.count).then(a.key.cmp(&b.key)));
    let total: u64 = records.iter().map(|r| r.count as u64).sum();

    let mut out = String::new();
    let _ = writeln!(out, "{keyboard}: {total} keystrokes today");
    if !records.is_empty() {
        let _ = writeln!(out, "  Top keys:");
        for record in records.iter().take(top) {
            let _ = writeln!(
                out,
                "    {:<16} {:>6}  (layer {}, row {}, col {})",
                chord_label(record.key.keycode, record.modifiers),
                record.count,
                record.key.layer,
                record.key.row,
                record.key.col
            );
        }
    }

    let mut hands = store.hand_usage(keyboard, day)?;
    hands.sort_by_key(|h| (h.bucket, h.streak));
    render_histogram(&mut out, "Hand streaks", &hands);

    let mut fingers = store.finger_usage(keyboard, day)?;
    fingers.sort_by_key(|f| (f.bucket, f.streak));
    render_histogram(&mut out, "Finger streaks", &fingers);
    Ok(out)
}
