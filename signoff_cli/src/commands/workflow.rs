use anyhow::{Context, Result, bail};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::{Path, PathBuf};

use signoff_db::workflow::definition;
use signoff_db::{
    AttachmentUpload, Decision, Identity, NewWorkflow, SignoffRequest, Team, WorkflowId,
    WorkflowPatch, WorkflowRecord,
};

use crate::store_manager::StoreManager;

/// Reads a JSON or YAML document, picked by file extension.
pub fn load_document<T: DeserializeOwned, P: AsRef<Path>>(file: P) -> Result<T> {
    let file_path = file.as_ref();

    if !file_path.exists() {
        bail!("File not found: {}", file_path.display());
    }

    let content = std::fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read {}", file_path.display()))?;

    match file_path.extension().and_then(|s| s.to_str()) {
        Some("json") => serde_json::from_str(&content).context("Failed to parse JSON document"),
        Some("yaml") | Some("yml") => {
            serde_yaml::from_str(&content).context("Failed to parse YAML document")
        }
        _ => bail!("Unsupported file format. Use .json, .yaml, or .yml"),
    }
}

/// `key=value`; the value is read as JSON when it parses, else as a string.
pub fn parse_assignment(raw: &str) -> Result<(String, Value)> {
    let (key, value) = raw
        .split_once('=')
        .with_context(|| format!("Expected key=value, got '{}'", raw))?;

    let key = key.trim();
    if key.is_empty() {
        bail!("Field name cannot be empty in '{}'", raw);
    }

    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_owned()));
    Ok((key.to_owned(), value))
}

fn print_workflow(wf: &WorkflowRecord) {
    println!("{}  {}", wf.title(), wf.biller_integration_name().unwrap_or("-"));
    println!("Status:       {}", wf.status());
    println!(
        "Current step: {}. {} ({})",
        wf.current_step(),
        definition::display_label(wf.current_step()),
        definition::team_flow(wf.current_step()).unwrap_or_default()
    );
    if let Some(by) = &wf.requested_by {
        println!("Requested by: {}", by);
    }
    println!("Submitted:    {}", wf.submit_date());
    println!(
        "Updated:      {} by {}",
        wf.last_updated_date(),
        wf.last_updated_by().unwrap_or("-")
    );
    println!("Version:      {}", wf.version());

    println!("\nSteps:");
    for entry in wf.ledger().entries() {
        let mut line = format!(
            "  {}. {:<38} {:<9}",
            entry.step_number,
            definition::display_label(entry.step_number),
            entry.signoff_status.to_string()
        );
        if let Some(person) = &entry.signoff_person {
            line.push_str(&format!(" by {}", person));
        }
        if let Some(date) = entry.signoff_date {
            line.push_str(&format!(" at {}", date));
        }
        if let Some(remarks) = &entry.remarks {
            line.push_str(&format!(" ({})", remarks));
        }
        println!("{}", line);
    }

    if !wf.fields.is_empty() {
        println!("\nFields:");
        for (name, value) in &wf.fields {
            println!("  {}: {}", name, value);
        }
    }

    if !wf.attachments().is_empty() {
        println!("\nAttachments:");
        for a in wf.attachments() {
            println!(
                "  {} ({} bytes, by {}){}",
                a.file_name,
                a.size_bytes,
                a.uploaded_by,
                a.description
                    .as_deref()
                    .map(|d| format!(" - {}", d))
                    .unwrap_or_default()
            );
        }
    }
}

pub fn create(file: PathBuf, attach: Vec<PathBuf>) -> Result<()> {
    let payload: NewWorkflow = load_document(&file)?;
    let uploader = payload.requested_by.clone().unwrap_or_default();

    let mut uploads = Vec::new();
    for path in &attach {
        match AttachmentUpload::from_path(path, &uploader) {
            Ok(upload) => uploads.push(upload),
            Err(e) => eprintln!("Skipping attachment {}: {}", path.display(), e),
        }
    }

    let store = StoreManager::load()?;
    let wf = store
        .service()
        .create_with_attachments(payload, uploads)
        .context("Failed to create workflow")?;

    if wf.attachments().len() < attach.len() {
        eprintln!(
            "{} of {} attachment(s) could not be stored",
            attach.len() - wf.attachments().len(),
            attach.len()
        );
    }

    println!("Created {}", wf.title());
    print_workflow(&wf);
    Ok(())
}

pub fn show(id: WorkflowId) -> Result<()> {
    let store = StoreManager::load()?;
    let wf = store.service().get(id)?;
    print_workflow(&wf);
    Ok(())
}

pub fn list() -> Result<()> {
    let store = StoreManager::load()?;
    let summaries = store.service().list();

    if summaries.is_empty() {
        println!("No workflows yet.");
        println!("Create one with: signoff create --file <payload.json>");
        return Ok(());
    }

    println!("Workflows ({}):\n", summaries.len());
    for s in summaries {
        println!(
            "{}  {:<28} step {} {:<38} {}",
            s.title,
            s.biller_integration_name.as_deref().unwrap_or("-"),
            s.current_step,
            s.step_label,
            s.status
        );
    }
    Ok(())
}

pub fn steps() -> Result<()> {
    for step in definition::all() {
        println!(
            "{}. {:<38} {}",
            step.step_number,
            step.label,
            step.team_flow()
        );
    }
    Ok(())
}

pub fn update(
    id: WorkflowId,
    user: String,
    team: Team,
    sets: Vec<String>,
    file: Option<PathBuf>,
) -> Result<()> {
    let mut patch = match file {
        Some(path) => load_document::<WorkflowPatch, _>(path)?,
        None => WorkflowPatch::new(),
    };
    for raw in &sets {
        let (key, value) = parse_assignment(raw)?;
        patch = patch.set(&key, value);
    }

    if patch.is_empty() {
        bail!("Nothing to update. Pass --set key=value or --file");
    }

    let store = StoreManager::load()?;
    let before = store.service().history(id)?.len();
    let wf = store
        .service()
        .update(id, &patch, &Identity::new(&user, team))?;

    let entry = wf.history().get(before);
    match entry {
        None => println!("{}: no field changed", wf.title()),
        Some(entry) => {
            println!("{}: {} field(s) changed", wf.title(), entry.changes.len());
            for (name, change) in &entry.changes {
                println!("  {}: {} -> {}", name, change.old_value, change.new_value);
            }
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn signoff(
    id: WorkflowId,
    step: u8,
    team: Team,
    person: String,
    decision: Decision,
    remarks: Option<String>,
    expected_version: Option<u64>,
) -> Result<()> {
    let mut request = SignoffRequest::new(step, team, decision, &person);
    if let Some(remarks) = &remarks {
        request = request.with_remarks(remarks);
    }
    if let Some(version) = expected_version {
        request = request.at_version(version);
    }

    let store = StoreManager::load()?;
    let wf = store.service().signoff(id, &request)?;

    println!(
        "{}: step {} ({}) {} by {}",
        wf.title(),
        step,
        definition::display_label(step),
        decision,
        person
    );
    if wf.is_done() {
        println!("Workflow is done.");
    } else {
        println!(
            "Now at step {}. {}",
            wf.current_step(),
            definition::display_label(wf.current_step())
        );
    }
    Ok(())
}

pub fn resubmit(id: WorkflowId, step: u8, team: Team) -> Result<()> {
    let store = StoreManager::load()?;
    let wf = store.service().resubmit(id, step, team)?;
    println!(
        "{}: step {} ({}) is pending again",
        wf.title(),
        step,
        definition::display_label(step)
    );
    Ok(())
}

pub fn history(id: WorkflowId) -> Result<()> {
    let store = StoreManager::load()?;
    let history = store.service().history(id)?;

    if history.is_empty() {
        println!("{}: no edits recorded", id);
        return Ok(());
    }

    for entry in history {
        println!(
            "#{} by {} at {} [{}]",
            entry.sequence,
            entry.edited_by,
            entry.edited_at,
            entry.entry_hash.get(..8).unwrap_or(&entry.entry_hash)
        );
        for (name, change) in &entry.changes {
            println!("  {}: {} -> {}", name, change.old_value, change.new_value);
        }
    }
    Ok(())
}

pub fn rejections(id: WorkflowId) -> Result<()> {
    let store = StoreManager::load()?;
    let rejections = store.service().rejections(id)?;

    if rejections.is_empty() {
        println!("{}: no rejections", id);
        return Ok(());
    }

    for r in rejections {
        let restart = r
            .restart_step
            .map(|s| format!(", restarted at step {}", s))
            .unwrap_or_default();
        println!(
            "step {} ({}) rejected by {} at {}{}",
            r.step_number,
            definition::display_label(r.step_number),
            r.rejected_by,
            r.rejected_at,
            restart
        );
        if let Some(remarks) = r.remarks {
            println!("  {}", remarks);
        }
    }
    Ok(())
}

pub fn attach(
    id: WorkflowId,
    path: PathBuf,
    user: String,
    team: Team,
    description: Option<String>,
) -> Result<()> {
    let mut upload = AttachmentUpload::from_path(&path, &user)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if let Some(description) = &description {
        upload = upload.with_description(description);
    }

    let store = StoreManager::load()?;
    let stored = store
        .service()
        .attach(id, &upload, &Identity::new(&user, team))?;

    println!(
        "{}: attached {} ({} bytes)",
        id, stored.file_name, stored.size_bytes
    );
    Ok(())
}
