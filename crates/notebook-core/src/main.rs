use std::path::{Path, PathBuf};
use std::sync::PoisonError;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use notebook_core::settings::{load_settings, load_settings_from, settings_path};
use notebook_core::{
    command_ids, BindingOptions, CellKind, CommandArgs, CommandOutcome, KernelSessionBinding,
    NotebookDocument, NotebookSettings, RendererRegistry, SerializedNotebook,
};
use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};

#[derive(Parser, Debug)]
#[command(name = "notebook-core")]
#[command(about = "Inspect and edit Jupyter notebooks")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Settings file (default: platform config dir)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the cells of a notebook
    Cells {
        path: PathBuf,

        /// Output the loaded notebook as JSON
        #[arg(long)]
        json: bool,
    },

    /// Change the type of cells and write the notebook back out
    Convert {
        path: PathBuf,

        /// Target cell type: code, markdown or raw
        #[arg(long)]
        to: CellKind,

        /// Cell ids to convert (default: all cells)
        #[arg(long, value_delimiter = ',')]
        cells: Vec<String>,

        /// Where to write the result (default: stdout)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Print the effective settings
    Settings {
        /// Print the settings file path instead
        #[arg(long)]
        path: bool,
    },
}

#[derive(Tabled)]
struct CellRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "TYPE")]
    kind: String,
    #[tabled(rename = "COUNT")]
    count: String,
    #[tabled(rename = "SOURCE")]
    source: String,
    #[tabled(rename = "OUTPUT")]
    output: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    let settings = match &cli.settings {
        Some(path) => load_settings_from(path),
        None => load_settings(),
    };

    match cli.command {
        Commands::Cells { path, json } => list_cells(&path, json, &settings),
        Commands::Convert {
            path,
            to,
            cells,
            output,
        } => convert(&path, to, cells, output.as_deref(), settings).await,
        Commands::Settings { path } => {
            if path {
                let path = cli.settings.unwrap_or_else(settings_path);
                println!("{}", path.display());
            } else {
                println!("{}", serde_json::to_string_pretty(&settings)?);
            }
            Ok(())
        }
    }
}

fn read_notebook(path: &Path) -> Result<SerializedNotebook> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    SerializedNotebook::from_json_str(&json)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

fn first_line(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() > 40 {
        format!("{}…", line.chars().take(39).collect::<String>())
    } else {
        line.to_string()
    }
}

fn list_cells(path: &Path, json: bool, settings: &NotebookSettings) -> Result<()> {
    let model = read_notebook(path)?;
    let mut document = NotebookDocument::new(settings.read_only);
    document.load(&model)?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&document.to_serialized()?)?
        );
        return Ok(());
    }

    let renderers = RendererRegistry::with_defaults();
    let rows = document
        .cells()
        .iter()
        .map(|cell| {
            let output = cell
                .outputs()
                .first()
                .map(|o| renderers.render_output(o, cell.trusted()))
                .transpose()?
                .flatten()
                .map(|shown| first_line(&shown.content))
                .unwrap_or_else(|| "-".to_string());
            Ok(CellRow {
                id: cell.id().to_string(),
                kind: cell.kind().to_string(),
                count: cell
                    .execution_count()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                source: first_line(cell.source()),
                output,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    if rows.is_empty() {
        println!("No cells in {}", path.display());
        return Ok(());
    }
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
    Ok(())
}

async fn convert(
    path: &Path,
    to: CellKind,
    cells: Vec<String>,
    output: Option<&Path>,
    settings: NotebookSettings,
) -> Result<()> {
    let model = read_notebook(path)?;
    let binding = KernelSessionBinding::new(BindingOptions {
        model: Some(model),
        settings,
        ..Default::default()
    });
    binding.initialize(false).await?;

    let document = binding.document();
    let ids = if cells.is_empty() {
        let document = document.lock().unwrap_or_else(PoisonError::into_inner);
        let all: Vec<String> = document.cells().iter().map(|c| c.id().to_string()).collect();
        all
    } else {
        cells
    };

    let mut args = CommandArgs::new();
    args.insert("cell_type".to_string(), Value::from(to.to_string()));
    args.insert("cells".to_string(), Value::from(ids));
    match binding
        .commands()
        .invoke(command_ids::CHANGE_CELL_TYPE, args)
        .await?
    {
        CommandOutcome::Executed(converted) => {
            info!("[convert] Converted {} cell(s) to {}", converted, to)
        }
        CommandOutcome::Disabled => anyhow::bail!("Conversion is not available"),
    }

    let notebook = document
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .to_serialized()?;
    let json = serde_json::to_string_pretty(&notebook)?;
    match output {
        Some(out) => {
            std::fs::write(out, json + "\n")
                .with_context(|| format!("Failed to write {}", out.display()))?;
            info!("[convert] Wrote {}", out.display());
        }
        None => println!("{}", json),
    }
    binding.dispose();
    Ok(())
}
