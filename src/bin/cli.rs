#![cfg(not(tarpaulin_include))]

use clap::Parser;
use dataflow::cell::{CellValue, ColumnKind};
use dataflow::cleaning::FillStrategy;
use dataflow::config::{Config, DEFAULT_SESSION_ROOT};
use dataflow::filter::{FilterOp, FilterPredicate};
use dataflow::graph::{Aggregation, ChartKind, ChartRequest};
use dataflow::reconcile::EditedRow;
use dataflow::session::Session;
use dataflow::stats;
use dataflow::table::RowId;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Instant;

const DEFAULT_SHOW_ROWS: usize = 20;

#[derive(Parser, Debug)]
#[command(about = "Interactive DataFlow session in the terminal.")]
struct Args {
    /// CSV or Excel file to open. Without it the last autosave is resumed.
    file: Option<PathBuf>,

    /// Directory for the autosave and generated artifacts.
    #[arg(long, env = "DATAFLOW_SESSION_DIR", default_value = DEFAULT_SESSION_ROOT)]
    session_dir: PathBuf,
}

#[derive(Debug, PartialEq)]
enum Command {
    Quit,
    Help,
    Show(usize),
    Open(PathBuf),
    Filter(FilterPredicate),
    Unfilter,
    Set(RowId, String, String),
    Add(Vec<(String, String)>),
    DeleteRows(Vec<RowId>),
    DeleteColumns(Vec<String>),
    Fill(FillStrategy),
    Rename(Vec<(String, String)>),
    Restore,
    Clear,
    Stats(Option<String>),
    Chart(ChartRequest),
    Report,
    Export(String, PathBuf),
    Output(bool),
}

fn pairs(text: &str, separator: char, assign: &str) -> Result<Vec<(String, String)>, String> {
    text.split(separator)
        .filter(|part| !part.trim().is_empty())
        .map(|part| {
            part.split_once(assign)
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .ok_or_else(|| format!("expected <name>{}<value>, got `{}`", assign, part.trim()))
        })
        .collect()
}

fn parse_command(line: &str) -> Result<Command, String> {
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    match word {
        "q" | "quit" => Ok(Command::Quit),
        "help" => Ok(Command::Help),
        "show" if rest.is_empty() => Ok(Command::Show(DEFAULT_SHOW_ROWS)),
        "show" => rest.parse().map(Command::Show).map_err(|_| "usage: show [rows]".to_string()),
        "open" if !rest.is_empty() => Ok(Command::Open(PathBuf::from(rest))),
        "filter" => {
            let mut parts = rest.splitn(3, char::is_whitespace);
            match (parts.next(), parts.next(), parts.next()) {
                (Some(column), Some(op), value) if !column.is_empty() => Ok(Command::Filter(
                    FilterPredicate::new(column, op.parse::<FilterOp>()?, value.unwrap_or("").trim()),
                )),
                _ => Err("usage: filter <column> <op> <value>".into()),
            }
        }
        "unfilter" => Ok(Command::Unfilter),
        "set" => {
            let (id, assignment) = rest.split_once(char::is_whitespace).ok_or("usage: set <row_id> <column>=<value>")?;
            let id = id.parse().map_err(|_| format!("invalid row id `{}`", id))?;
            let (column, value) = assignment
                .split_once('=')
                .ok_or("usage: set <row_id> <column>=<value>")?;
            Ok(Command::Set(id, column.trim().to_string(), value.trim().to_string()))
        }
        "add" => Ok(Command::Add(pairs(rest, ',', "=")?)),
        "delrows" => rest
            .split([',', ' '])
            .filter(|s| !s.is_empty())
            .map(|s| s.parse().map_err(|_| format!("invalid row id `{}`", s)))
            .collect::<Result<_, _>>()
            .map(Command::DeleteRows),
        "delcols" => Ok(Command::DeleteColumns(
            rest.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect(),
        )),
        "fill" => {
            let (mode, value) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            match mode {
                "value" => Ok(Command::Fill(FillStrategy::Value(value.trim().to_string()))),
                other => other.parse().map(Command::Fill),
            }
        }
        "rename" => Ok(Command::Rename(pairs(rest, ';', "->")?)),
        "restore" => Ok(Command::Restore),
        "clear" => Ok(Command::Clear),
        "stats" if rest.is_empty() => Ok(Command::Stats(None)),
        "stats" => Ok(Command::Stats(Some(rest.to_string()))),
        "chart" => parse_chart(rest).map(Command::Chart),
        "report" => Ok(Command::Report),
        "export" => match rest.split_once(char::is_whitespace) {
            Some((format @ ("csv" | "xlsx"), path)) => {
                Ok(Command::Export(format.to_string(), PathBuf::from(path.trim())))
            }
            _ => Err("usage: export <csv|xlsx> <path>".into()),
        },
        "disable_output" => Ok(Command::Output(false)),
        "enable_output" => Ok(Command::Output(true)),
        _ => Err("invalid command".into()),
    }
}

/// `chart <kind> <y_column> [x=<column>] [agg=<aggregation>] [top=<n>]`
fn parse_chart(rest: &str) -> Result<ChartRequest, String> {
    let mut words = rest.split_whitespace();
    let usage = "usage: chart <line|bar|scatter|histogram> <y> [x=<col>] [agg=<sum|mean|count|max|min>] [top=<n>]";
    let kind: ChartKind = words.next().ok_or(usage)?.parse()?;
    let mut request = ChartRequest::new(kind, words.next().ok_or(usage)?);

    for option in words {
        match option.split_once('=') {
            Some(("x", column)) => request.x_column = Some(column.to_string()),
            Some(("agg", agg)) => request.aggregation = agg.parse::<Aggregation>()?,
            Some(("top", n)) => {
                request.top_n = Some(n.parse().map_err(|_| format!("invalid top-n `{}`", n))?)
            }
            _ => return Err(usage.to_string()),
        }
    }
    Ok(request)
}

fn print_help() {
    println!("Commands:");
    println!("  show [rows]                       Print the current view");
    println!("  open <file>                       Import a .csv/.xlsx file");
    println!("  filter <col> <op> <value>         Ops: = != > < >= <= contains");
    println!("  unfilter                          Remove the filter");
    println!("  set <row_id> <col>=<value>        Edit one cell");
    println!("  add <col>=<value>[,...]           Append a row");
    println!("  delrows <ids>                     Delete rows (ids are renumbered)");
    println!("  delcols <a,b,...>                 Delete columns");
    println!("  fill <mean|median|mode>           Fill missing values");
    println!("  fill value <text>                 Fill missing values with a constant");
    println!("  rename A->B;C->D                  Rename columns");
    println!("  restore                           Go back to the imported table");
    println!("  clear                             Discard the table");
    println!("  stats [col]                       Summary or column statistics");
    println!("  chart <kind> <y> [x=] [agg=] [top=]");
    println!("  report                            Write the PDF report");
    println!("  export <csv|xlsx> <path>          Save the table");
    println!("  disable_output / enable_output    Toggle printing the view");
    println!("  q                                 Quit");
}

fn display(session: &Session, max_rows: usize) {
    let view = session.view();
    let Some(master) = session.master() else {
        println!("(no table loaded)");
        return;
    };
    if let Some(predicate) = session.predicate() {
        print!("filter: {}", predicate);
        match session.filter_error() {
            Some(e) => println!("  [not applied: {}]", e),
            None => println!(),
        }
    }

    let table = &view.table;
    print!("{:>6}", "row");
    for column in table.columns() {
        print!(" {:>12.12}", column);
    }
    println!();
    for (id, row) in view.ids.iter().zip(table.rows()).take(max_rows) {
        print!("{:>6}", id);
        for cell in row {
            print!(" {:>12.12}", cell.to_string());
        }
        println!();
    }
    println!("({} of {} rows shown)", view.len().min(max_rows), master.len());
}

fn run_command(session: &mut Session, command: Command, show: &mut bool) -> Result<String, String> {
    let err = |e: dataflow::DataflowError| e.to_string();
    let status = match command {
        Command::Quit | Command::Help => "ok".to_string(),
        Command::Show(n) => {
            display(session, n);
            "ok".to_string()
        }
        Command::Output(on) => {
            *show = on;
            "ok".to_string()
        }
        Command::Open(path) => {
            let view = session.import_file(&path).map_err(err)?;
            format!("{} rows loaded", view.len())
        }
        Command::Filter(predicate) => {
            session.set_filter(predicate);
            match session.filter_error() {
                Some(e) => format!("filter not applied: {}", e),
                None => format!("{} rows match", session.view().len()),
            }
        }
        Command::Unfilter => {
            session.clear_filter();
            "ok".to_string()
        }
        Command::Set(id, column, value) => {
            let kind = session
                .master()
                .and_then(|m| m.kind_of(&column))
                .unwrap_or(ColumnKind::Empty);
            let row = EditedRow::existing(id).with(column, CellValue::coerce(&value, kind));
            let report = session.apply_edits(&[row]);
            if report.skipped.is_empty() {
                "ok".to_string()
            } else {
                format!("unknown row {}", id)
            }
        }
        Command::Add(values) => {
            let master = session.master().ok_or("no table loaded")?;
            let mut row = EditedRow::inserted();
            for (column, value) in values {
                let kind = master.kind_of(&column).unwrap_or(ColumnKind::Empty);
                row = row.with(column, CellValue::coerce(&value, kind));
            }
            let report = session.apply_edits(&[row]);
            format!("row {:?} appended", report.appended)
        }
        Command::DeleteRows(ids) => format!("{} rows deleted", session.delete_rows(&ids)),
        Command::DeleteColumns(names) => format!("{} columns deleted", session.delete_columns(&names)),
        Command::Fill(strategy) => format!("{} cells filled", session.fillna(&strategy)),
        Command::Rename(mapping) => {
            let report = session.rename_columns(mapping);
            match report.rejected.len() {
                0 => format!("{} renamed", report.renamed.len()),
                n => format!("{} renamed, {} rejected", report.renamed.len(), n),
            }
        }
        Command::Restore => {
            session.restore_original();
            "restored".to_string()
        }
        Command::Clear => {
            session.clear();
            "cleared".to_string()
        }
        Command::Stats(column) => {
            let view = session.view();
            let table = &view.table;
            match column {
                Some(name) => {
                    let stats = stats::describe_view_column(view, &name).ok_or(format!("unknown column `{}`", name))?;
                    println!("{}", serde_json::to_string_pretty(&stats).map_err(|e| e.to_string())?);
                }
                None => {
                    let summary = stats::summarize(table);
                    println!(
                        "{} rows, {} columns, {} missing",
                        summary.rows, summary.columns, summary.missing
                    );
                    for column in stats::describe_view(view) {
                        println!("{}", serde_json::to_string(&column).map_err(|e| e.to_string())?);
                    }
                }
            }
            "ok".to_string()
        }
        Command::Chart(request) => {
            let path = session.build_chart(&request).map_err(err)?;
            format!("chart written to {}", path.display())
        }
        Command::Report => {
            let path = session.build_report().map_err(err)?;
            format!("report written to {}", path.display())
        }
        Command::Export(format, path) => {
            let bytes = match format.as_str() {
                "xlsx" => session.export_xlsx(),
                _ => session.export_csv(),
            }
            .map_err(err)?;
            std::fs::write(&path, bytes).map_err(|e| e.to_string())?;
            format!("exported to {}", path.display())
        }
    };
    Ok(status)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    let args = Args::parse();

    let config = Config {
        session_root: args.session_dir,
        ..Config::default()
    };
    let mut session = Session::resume(config.local_session());
    let mut status = String::from("ok");
    if let Some(file) = &args.file {
        if let Err(e) = session.import_file(file) {
            status = e.to_string();
        }
    }

    let mut show = true;
    let mut start_time = Instant::now();
    loop {
        if show {
            display(&session, DEFAULT_SHOW_ROWS);
        }

        let elapsed_time = start_time.elapsed().as_secs_f64();
        print!("[{:.1}] ({}) > ", elapsed_time, status);
        io::stdout().flush()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        start_time = Instant::now();

        if line.is_empty() {
            status = String::from("invalid command");
            continue;
        }

        match parse_command(line) {
            Ok(Command::Quit) => break,
            Ok(Command::Help) => {
                print_help();
                status = String::from("ok");
            }
            Ok(command) => {
                status = run_command(&mut session, command, &mut show).unwrap_or_else(|e| e);
            }
            Err(e) => status = e,
        }
    }

    Ok(())
}
