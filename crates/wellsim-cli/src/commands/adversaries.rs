use wellsim_core::{AdversaryRegistry, Result};

pub fn run() -> Result<()> {
    let registry = AdversaryRegistry::with_builtins();
    let kinds = registry.describe();
    println!("{} adversary kind(s):\n", kinds.len());
    for (name, description) in kinds {
        println!("  {name:<18} {description}");
    }
    println!("\nEvery kind takes a `target` channel address (e.g. \"morphology.nucleus\").");
    Ok(())
}
