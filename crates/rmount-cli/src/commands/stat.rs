use rmount_remote::Session;

pub async fn run(session: &Session, path: &str, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let entry = session.remote().stat(path).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entry)?);
        return Ok(());
    }

    println!("Path:     {}", entry.path);
    println!("Name:     {}", entry.name);
    println!("Type:     {}", if entry.is_dir { "directory" } else { "file" });
    if !entry.is_dir {
        println!("Size:     {} bytes", entry.size);
    }
    println!("Mode:     {:o}", entry.mode);

    if let Some(modified) = entry.modified {
        println!("Modified: {}", modified.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    Ok(())
}
