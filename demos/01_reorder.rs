//! Demo 01: Drag-to-reorder
//!
//! Seeds three tasks, drags them around (once with the split
//! begin/persist/finish steps), and shows the priority writes surviving a
//! full reload.
//!
//! Run with: cargo run --example 01_reorder

use eyre::Result;
use std::sync::Arc;
use todolist::{LocalDataService, ReorderOutcome, SortMode, TaskStore};

fn show(store: &TaskStore<LocalDataService>) {
    for (i, task) in store.tasks().iter().enumerate() {
        println!("   {}. {} (priority {})", i, task.title, task.priority);
    }
    println!();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let service = Arc::new(LocalDataService::open(temp_dir.path())?);

    println!("Todolist Reorder Demo");
    println!("=====================\n");

    let mut store = TaskStore::new(Arc::clone(&service), "demo-user", SortMode::Priority);
    store.mount().await?;

    println!("1. Adding tasks...");
    for title in ["Write report", "Review PR", "Book flights"] {
        store.add(title, None).await?;
    }
    // Every task starts at priority 0; one reorder normalizes them
    store.reorder(0, Some(0)).await?;
    store.drain_changes().await?;
    show(&store);

    println!("2. Dragging the last task to the top...");
    match store.reorder(2, Some(0)).await? {
        ReorderOutcome::Moved { writes } => println!("   {} priority writes issued", writes),
        ReorderOutcome::Cancelled => println!("   gesture cancelled"),
    }
    show(&store);

    println!("3. Moving the middle task down, rendering before it is saved...");
    if let Some(pending) = store.begin_reorder(1, Some(2)) {
        println!("   pending: {} writes, loading = {}", pending.writes().len(), store.is_loading());
        show(&store);
        let result = pending.persist(service.as_ref()).await;
        store.finish_reorder(pending, result)?;
    }

    println!("4. Dropping outside the list (cancelled gesture)...");
    let outcome = store.reorder(1, None).await?;
    println!("   outcome: {:?}\n", outcome);

    println!("5. Reloading from the service...");
    let handled = store.drain_changes().await?;
    println!("   {} change notifications handled", handled);
    show(&store);

    Ok(())
}
