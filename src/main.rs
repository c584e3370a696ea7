use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use colored::Colorize;
use eyre::{Result, bail, eyre};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use todolist::{Config, LocalDataService, ReorderOutcome, SortMode, Task, TaskStore};
use tracing::{Level, warn};

#[derive(Parser)]
#[command(name = "todolist")]
#[command(about = "Personal to-do list with a live task view and drag-to-reorder priorities")]
#[command(version = env!("GIT_DESCRIBE"))]
struct Cli {
    /// Config file (default: <config dir>/todolist/config.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the task log and cache
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Owner whose tasks to work on (overrides config and TODOLIST_OWNER)
    #[arg(short, long)]
    owner: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show tasks in display order
    List {
        /// created_at, due_date or priority
        #[arg(short, long)]
        sort: Option<SortMode>,
    },

    /// Add a task
    Add {
        title: String,

        /// Due date (YYYY-MM-DD)
        #[arg(long)]
        due: Option<NaiveDate>,
    },

    /// Mark a task done, or not done again
    Toggle {
        /// Position in the list (1-based) or task id / id prefix
        task: String,

        #[arg(short, long)]
        sort: Option<SortMode>,
    },

    /// Change a task's title and/or due date
    Edit {
        /// Position in the list (1-based) or task id / id prefix
        task: String,

        #[arg(short, long)]
        title: Option<String>,

        /// New due date (YYYY-MM-DD)
        #[arg(long, conflicts_with = "clear_due")]
        due: Option<NaiveDate>,

        /// Remove the due date
        #[arg(long)]
        clear_due: bool,

        #[arg(short, long)]
        sort: Option<SortMode>,
    },

    /// Delete a task
    Rm {
        /// Position in the list (1-based) or task id / id prefix
        task: String,

        #[arg(short, long)]
        sort: Option<SortMode>,
    },

    /// Move a task to another position (1-based) and save the new priorities
    Move {
        from: usize,
        to: usize,

        /// Order the positions refer to (default: priority)
        #[arg(short, long)]
        sort: Option<SortMode>,
    },

    /// Keep the list on screen and reprint it on every change
    Watch {
        #[arg(short, long)]
        sort: Option<SortMode>,
    },

    /// Rebuild the cache from the task log
    Sync,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::WARN })
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(owner) = cli.owner {
        config.owner_id = Some(owner);
    }
    if let Some(dir) = cli.data_dir {
        config.data_dir = Some(dir);
    }

    let service = Arc::new(LocalDataService::open(config.resolved_data_dir())?);

    match cli.command {
        Commands::List { sort } => {
            let store = mount(&service, &config, sort).await?;
            print_tasks(&store);
        }
        Commands::Add { title, due } => {
            let mut store = mount(&service, &config, None).await?;
            match store.add(&title, due).await? {
                Some(task) => println!("{} {}", "Added".green(), task.title.bold()),
                None => println!("{}", "Nothing added: title is blank".yellow()),
            }
            print_tasks(&store);
        }
        Commands::Toggle { task, sort } => {
            let mut store = mount(&service, &config, sort).await?;
            let task = resolve_task(&store, &task)?;
            store.toggle_complete(&task).await?;
            print_tasks(&store);
        }
        Commands::Edit {
            task,
            title,
            due,
            clear_due,
            sort,
        } => {
            let mut store = mount(&service, &config, sort).await?;
            let task = resolve_task(&store, &task)?;
            let new_title = title.unwrap_or_else(|| task.title.clone());
            let new_due = if clear_due { None } else { due.or(task.due_date) };
            if !store.edit(&task, &new_title, new_due).await? {
                println!("{}", "Nothing changed: title is blank".yellow());
            }
            print_tasks(&store);
        }
        Commands::Rm { task, sort } => {
            let mut store = mount(&service, &config, sort).await?;
            let task = resolve_task(&store, &task)?;
            store.delete(&task).await?;
            println!("{} {}", "Deleted".red(), task.title);
            print_tasks(&store);
        }
        Commands::Move { from, to, sort } => {
            let sort = sort.unwrap_or(SortMode::Priority);
            let mut store = mount(&service, &config, Some(sort)).await?;
            let source = position(from)?;
            let destination = position(to)?;
            match store.reorder(source, Some(destination)).await? {
                ReorderOutcome::Cancelled => bail!("Position out of range: list has {} tasks", store.tasks().len()),
                ReorderOutcome::Moved { writes } => {
                    println!("{} ({} priorities saved)", "Moved".green(), writes);
                }
            }
            print_tasks(&store);
        }
        Commands::Watch { sort } => {
            let mut store = mount(&service, &config, sort).await?;
            watch(&service, &mut store, config.poll_interval_ms).await;
        }
        Commands::Sync => {
            println!("Syncing cache from task log...");
            let count = service.sync()?;
            println!("Sync complete: {} tasks", count);
        }
    }

    Ok(())
}

async fn mount(
    service: &Arc<LocalDataService>,
    config: &Config,
    sort: Option<SortMode>,
) -> Result<TaskStore<LocalDataService>> {
    let owner_id = config
        .owner_id
        .as_deref()
        .ok_or_else(|| eyre!("No owner configured: pass --owner, set TODOLIST_OWNER, or add owner_id to the config file"))?;
    let mut store = TaskStore::new(Arc::clone(service), owner_id, sort.unwrap_or(config.sort))
        .with_priority_writes(config.priority_writes);
    store.mount().await?;
    Ok(store)
}

async fn watch(service: &LocalDataService, store: &mut TaskStore<LocalDataService>, poll_interval_ms: u64) {
    print_tasks(store);

    let mut poll = tokio::time::interval(Duration::from_millis(poll_interval_ms.max(50)));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = store.next_change() => {
                let Some(event) = event else { break };
                match store.handle_change(event).await {
                    Ok(()) => {
                        println!("{}", "--".dimmed());
                        print_tasks(store);
                    }
                    Err(e) => eprintln!("{}", e.to_string().red()),
                }
            }
            _ = poll.tick() => {
                if let Err(e) = service.poll_external() {
                    warn!(error = %e, "Failed to check for external changes");
                }
            }
            _ = &mut ctrl_c => break,
        }
    }

    store.unmount();
}

/// 1-based position from the command line to a list index
fn position(n: usize) -> Result<usize> {
    n.checked_sub(1).ok_or_else(|| eyre!("Positions start at 1"))
}

/// Find a task by 1-based position, full id, or unique id prefix
fn resolve_task(store: &TaskStore<LocalDataService>, reference: &str) -> Result<Task> {
    let tasks = store.tasks();

    if let Ok(n) = reference.parse::<usize>() {
        return position(n)
            .ok()
            .and_then(|i| tasks.get(i))
            .cloned()
            .ok_or_else(|| eyre!("No task at position {} (list has {})", n, tasks.len()));
    }

    if let Some(task) = tasks.iter().find(|t| t.id == reference) {
        return Ok(task.clone());
    }

    let matches: Vec<&Task> = tasks.iter().filter(|t| t.id.starts_with(reference)).collect();
    match matches.as_slice() {
        [task] => Ok((*task).clone()),
        [] => Err(eyre!("No task matches {:?}", reference)),
        _ => Err(eyre!("{:?} matches {} tasks; use a longer id", reference, matches.len())),
    }
}

fn print_tasks(store: &TaskStore<LocalDataService>) {
    let tasks = store.tasks();
    if tasks.is_empty() {
        println!("{}", "No tasks found.".dimmed());
        return;
    }

    let today = chrono::Local::now().date_naive();
    for (i, task) in tasks.iter().enumerate() {
        let check = if task.is_complete { "[x]".green() } else { "[ ]".normal() };
        let title = if task.is_complete {
            task.title.dimmed().strikethrough()
        } else {
            task.title.bold()
        };
        let due = match task.due_date {
            Some(d) if !task.is_complete && d < today => format!("  due {}", d).red(),
            Some(d) => format!("  due {}", d).normal(),
            None => "".normal(),
        };
        println!("{:>3}. {} {}{}  {}", i + 1, check, title, due, task.id.dimmed());
    }
}
