use classweave::jvm::class_file::ClassFile;
use classweave::jvm::Error;
use classweave::model::{ClassRegistry, Member, MemberKind};

use clap::{crate_version, Arg, ArgAction, Command};
use std::fs;

fn main() -> Result<(), Error> {
    env_logger::init();

    let matches = Command::new("JVM class file dumper")
        .version(crate_version!())
        .about("Print the structure and bytecode of a JVM class file")
        .arg(
            Arg::new("method")
                .long("method")
                .value_name("NAME")
                .required(false)
                .help("Only show methods with this name (or `name(descriptor)`)"),
        )
        .arg(
            Arg::new("no-code")
                .long("no-code")
                .action(ArgAction::SetTrue)
                .help("Skip the disassembly of method bodies"),
        )
        .arg(
            Arg::new("INPUT")
                .help("Class file to read")
                .required(true)
                .index(1),
        )
        .get_matches();

    let path = matches
        .get_one::<String>("INPUT")
        .ok_or_else(|| Error::NotFound(String::from("input file")))?;
    let method_filter = matches.get_one::<String>("method").map(String::as_str);
    let show_code = !matches.get_flag("no-code");

    log::info!("Reading '{}'", path);
    let bytes = fs::read(path).map_err(Error::IoError)?;
    let name = ClassFile::parse(&bytes)?.name()?.to_owned();

    let registry = ClassRegistry::new();
    let class = registry.register_bytes(&name, bytes, false)?;

    let version = class.version()?;
    println!("class {}", class.name());
    println!("  version: {}.{}", version.major, version.minor);
    println!("  flags: {:?}", class.access_flags()?);
    if let Some(superclass) = class.superclass_name()? {
        println!("  extends: {}", superclass);
    }
    for interface in class.interface_names()? {
        println!("  implements: {}", interface);
    }

    let fields = class.declared_fields()?;
    if !fields.is_empty() {
        println!();
        println!("fields:");
        for field in &fields {
            println!(
                "  {} {}: {:?}",
                field.name(),
                field.descriptor(),
                field.field_flags()?
            );
        }
    }

    println!();
    println!("methods:");
    for method in class.members()? {
        if method.kind() == MemberKind::Field || !selected(&method, method_filter) {
            continue;
        }
        let flags = method.method_flags()?;
        println!("  {}{}: {:?}", method.name(), method.descriptor(), flags);
        if !show_code || flags.is_bodiless() {
            continue;
        }
        match method.disassemble()? {
            Some(listing) => {
                for line in listing.lines() {
                    println!("    {}", line);
                }
            }
            None => log::warn!("{}{} has no Code attribute", method.name(), method.descriptor()),
        }
    }

    Ok(())
}

/// Whether a method passes the `--method` filter
fn selected(method: &Member, filter: Option<&str>) -> bool {
    match filter {
        None => true,
        Some(filter) if filter.contains('(') => {
            format!("{}{}", method.name(), method.descriptor()) == filter
        }
        Some(filter) => method.name() == filter,
    }
}
