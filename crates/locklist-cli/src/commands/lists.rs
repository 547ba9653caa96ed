use crate::app::AppContext;
use crate::helpers::{resolve_list, resolve_record};
use crate::output::{list_json, lists_json, print_list, print_lists};

pub async fn handle_lists(ctx: &AppContext<'_>, json: bool) -> anyhow::Result<()> {
    ctx.resume().await?;
    let lists = ctx.local().load_all().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&lists_json(&lists))?);
    } else {
        print_lists(&lists, ctx.quiet());
    }
    Ok(())
}

pub async fn handle_show(ctx: &AppContext<'_>, name: &str, json: bool) -> anyhow::Result<()> {
    ctx.resume().await?;
    let list = resolve_list(ctx.local(), name).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&list_json(&list))?);
    } else {
        print_list(&list, ctx.quiet());
    }
    Ok(())
}

pub async fn handle_add(ctx: &AppContext<'_>, name: &str, text: &str) -> anyhow::Result<()> {
    ctx.resume().await?;
    let list = resolve_list(ctx.local(), name).await?;
    let record = ctx.local().add_record(&list.storage_key, text).await?;
    if !ctx.quiet() {
        println!("Added \"{}\" to {}", record.text, list.title);
    }
    Ok(())
}

pub async fn handle_set_completed(
    ctx: &AppContext<'_>,
    name: &str,
    selector: &str,
    completed: bool,
) -> anyhow::Result<()> {
    ctx.resume().await?;
    let list = resolve_list(ctx.local(), name).await?;
    let record = resolve_record(&list, selector)?;
    ctx.local()
        .set_completed(&list.storage_key, &record.id, completed)
        .await?;
    if !ctx.quiet() {
        let verb = if completed { "Done" } else { "Reopened" };
        println!("{}: {}", verb, record.text);
    }
    Ok(())
}

pub async fn handle_edit(
    ctx: &AppContext<'_>,
    name: &str,
    selector: &str,
    text: &str,
) -> anyhow::Result<()> {
    ctx.resume().await?;
    let list = resolve_list(ctx.local(), name).await?;
    let record = resolve_record(&list, selector)?;
    ctx.local()
        .edit_record(&list.storage_key, &record.id, text)
        .await?;
    if !ctx.quiet() {
        println!("Updated item in {}", list.title);
    }
    Ok(())
}

pub async fn handle_rm(ctx: &AppContext<'_>, name: &str, selector: &str) -> anyhow::Result<()> {
    ctx.resume().await?;
    let list = resolve_list(ctx.local(), name).await?;
    let record = resolve_record(&list, selector)?;
    ctx.local()
        .remove_record(&list.storage_key, &record.id)
        .await?;
    if !ctx.quiet() {
        println!("Removed \"{}\" from {}", record.text, list.title);
    }
    Ok(())
}

pub async fn handle_new_list(ctx: &AppContext<'_>, title: &str) -> anyhow::Result<()> {
    ctx.resume().await?;
    let list = ctx.local().create_list(title).await?;
    if !ctx.quiet() {
        println!("Created {} ({})", list.title, list.storage_key);
    } else {
        println!("{}", list.storage_key);
    }
    Ok(())
}

/// Delete a list on the remote first when signed in, so another device
/// cannot bring it back.
pub async fn handle_delete_list(ctx: &AppContext<'_>, name: &str) -> anyhow::Result<()> {
    let session = ctx.resume().await?;
    let list = resolve_list(ctx.local(), name).await?;
    match session {
        Some(session) => session.coordinator().delete_list(&list.storage_key).await?,
        None => ctx.local().remove(&list.storage_key).await?,
    }
    if !ctx.quiet() {
        println!("Deleted {}", list.title);
    }
    Ok(())
}
