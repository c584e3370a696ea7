//! Demo 02: Sync loop
//!
//! Two task stores watch the same owner. Writes made through one show up in
//! the other once it handles the change notifications.
//!
//! Run with: cargo run --example 02_sync_loop

use chrono::NaiveDate;
use eyre::Result;
use std::sync::Arc;
use todolist::{LocalDataService, SortMode, TaskStore};

fn titles(store: &TaskStore<LocalDataService>) -> Vec<String> {
    store.tasks().iter().map(|t| t.title.clone()).collect()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let service = Arc::new(LocalDataService::open(temp_dir.path())?);

    println!("Todolist Sync Loop Demo");
    println!("=======================\n");

    let mut laptop = TaskStore::new(Arc::clone(&service), "demo-user", SortMode::CreatedAt);
    let mut phone = TaskStore::new(Arc::clone(&service), "demo-user", SortMode::DueDate);
    laptop.mount().await?;
    phone.mount().await?;
    println!("1. Two views mounted ({} live subscriptions)\n", service.subscriber_count());

    println!("2. Adding tasks on the laptop...");
    laptop.add("Renew passport", NaiveDate::from_ymd_opt(2026, 11, 30)).await?;
    laptop.add("Call plumber", NaiveDate::from_ymd_opt(2026, 10, 20)).await?;
    laptop.add("Read novel", None).await?;
    println!("   laptop (created_at): {:?}", titles(&laptop));
    println!("   phone before notifications: {:?}", titles(&phone));

    let handled = phone.drain_changes().await?;
    println!("   phone after {} notifications (due_date): {:?}\n", handled, titles(&phone));

    println!("3. Completing a task on the phone...");
    let first = phone.tasks()[0].clone();
    phone.toggle_complete(&first).await?;
    laptop.drain_changes().await?;
    for task in laptop.tasks() {
        println!("   [{}] {}", if task.is_complete { "x" } else { " " }, task.title);
    }
    println!();

    println!("4. Switching the phone to priority order...");
    phone.set_sort(SortMode::Priority).await?;
    println!("   phone: {:?}", titles(&phone));
    println!("   live subscriptions: {}\n", service.subscriber_count());

    drop(phone);
    println!("5. Phone unmounted; live subscriptions: {}", service.subscriber_count());

    Ok(())
}
