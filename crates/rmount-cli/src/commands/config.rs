use rmount_config::RmountConfig;

pub fn run(config: &RmountConfig) -> Result<(), Box<dyn std::error::Error>> {
    let effective = config.effective();

    // Print as YAML for readability
    let yaml = serde_yaml::to_string(&effective)?;
    println!("{}", yaml);

    Ok(())
}
