use clap::{Parser as ClapParser, Subcommand, ValueEnum};
use std::process;

use native_shim::{
    Arity, Bridge, FrameCreateInfo, HostRuntime, Raised, UNLIMITED_ARGUMENTS, UnitKind,
    Value, build_synthetic_frame, check_arity, debug::symbol_name, expand_splat,
    model::{ModelCreateInfo, ModelVm},
};

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Collect after this many allocations
    #[arg(long, global = true)]
    gc_threshold: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a synthetic frame and dump its tables
    Frame {
        #[arg(long)]
        name: String,
        #[arg(long)]
        file: String,
        /// Defaults to --file
        #[arg(long)]
        realpath: Option<String>,
        #[arg(long, value_enum, default_value_t = KindArg::Method)]
        kind: KindArg,
        #[arg(long)]
        start: i32,
        #[arg(long)]
        end: i32,
        /// Local variable names in slot order
        #[arg(long = "local")]
        locals: Vec<String>,
        #[arg(long, default_value_t = 0)]
        stack_max: u32,
    },
    /// Validate an argument count
    Arity {
        #[arg(long)]
        given: usize,
        #[arg(long)]
        min: i32,
        /// Omit for no upper bound
        #[arg(long)]
        max: Option<i32>,
    },
    /// Expand an array of --len integers for destructuring
    Splat {
        #[arg(long)]
        len: usize,
        #[arg(long)]
        before: usize,
        #[arg(long)]
        after: usize,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    Top,
    Method,
    Block,
    Class,
    Rescue,
    Ensure,
}

impl From<KindArg> for UnitKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Top => UnitKind::Top,
            KindArg::Method => UnitKind::Method,
            KindArg::Block => UnitKind::Block,
            KindArg::Class => UnitKind::Class,
            KindArg::Rescue => UnitKind::Rescue,
            KindArg::Ensure => UnitKind::Ensure,
        }
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let mut vm = ModelVm::new(ModelCreateInfo {
        gc_threshold: cli.gc_threshold,
    });

    let result = match cli.command {
        Command::Frame {
            name,
            file,
            realpath,
            kind,
            start,
            end,
            locals,
            stack_max,
        } => {
            dump_frame(
                &mut vm,
                &name,
                &file,
                realpath.as_deref().unwrap_or(&file),
                kind.into(),
                (start, end),
                &locals,
                stack_max,
            );
            Ok(())
        }
        Command::Arity { given, min, max } => {
            let arity = Arity::from_raw(min, max.unwrap_or(UNLIMITED_ARGUMENTS));
            check_arity(&mut vm, given, arity).map(|()| println!("ok"))
        }
        Command::Splat { len, before, after } => run_splat(&mut vm, len, before, after),
    };

    if let Err(raised) = result {
        report(&vm, raised);
        process::exit(1);
    }
}

#[allow(clippy::too_many_arguments)]
fn dump_frame(
    vm: &mut ModelVm,
    name: &str,
    file: &str,
    realpath: &str,
    kind: UnitKind,
    lines: (i32, i32),
    locals: &[String],
    stack_max: u32,
) {
    let id = vm.intern_symbol(name);
    let locals: Vec<_> = locals.iter().map(|l| vm.intern_symbol(l)).collect();
    let info = FrameCreateInfo {
        name: vm.new_string(name),
        id,
        path: vm.new_string(file),
        realpath: vm.new_string(realpath),
        parent: None,
        kind,
        start_line: lines.0,
        end_line: lines.1,
        locals: &locals,
        stack_max,
    };
    let unit = build_synthetic_frame(vm, &Bridge::global().config, &info);
    // the unit is pinned, its header strings are reachable from it
    vm.safepoint();

    let Some(body) = vm.unit_body(unit) else {
        eprintln!("unit {unit:?} has no body");
        process::exit(1);
    };
    println!("== {name} ({kind:?}) ==");
    println!("instructions: {}", body.iseq_size);
    println!("stack max:    {}", body.stack_max);
    for pc in 0..body.iseq_size {
        if let Some(entry) = vm.backtrace_entry(unit, pc) {
            println!("  {pc:>4}  {entry}");
        }
    }
    let local_table = body.local_table.clone();
    println!("locals:");
    for (slot, id) in local_table.into_iter().enumerate() {
        println!("  {slot:>4}  {}", symbol_name(&*vm, id));
    }
}

fn run_splat(vm: &mut ModelVm, len: usize, before: usize, after: usize) -> Result<(), Raised> {
    let elements: Vec<Value> = (0..len as i64).map(Value::from_fixnum).collect();
    let array = vm.new_array(&elements);
    let expanded = expand_splat(vm, array, before, after)?;
    let shown = vm.inspect(expanded)?;
    println!("{} {shown}", vm.array_len(expanded).unwrap_or(0));
    vm.safepoint();
    Ok(())
}

fn report(vm: &ModelVm, raised: Raised) {
    let class = vm.exception_class_name(raised.exception);
    let message = vm.exception_message(raised.exception).unwrap_or_default();
    eprintln!("{class}: {message}");
}
