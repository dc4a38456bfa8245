use miette::Result;
use plinth_core::VERSION;

pub fn run(json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::json!({ "name": "plinth", "version": VERSION }));
    } else {
        println!("plinth {VERSION}");
    }
    Ok(())
}
