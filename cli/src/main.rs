use clap::Parser;
use silica_rtl::{Design, DisplayItem, Netlist};

#[derive(Parser)]
struct Args {
    /// Bundled demo design to build: counter, blinker, or memcopy.
    #[arg(default_value = "counter")]
    demo: String,
    /// Print entry and action counts instead of the netlist itself.
    #[arg(short, long)]
    stats: bool,
}

/// An 8-bit free-running counter that announces itself and finishes at 42.
fn counter() -> Design {
    let design = Design::new();
    let count = design.reg(8, 0);
    design.assign(count, design.add(count.out(), design.lit(1, 8)));
    design.when(design.eq(count.out(), design.lit(42, 8)), || {
        design.display([DisplayItem::from("count = "), DisplayItem::from(count.out())]);
        design.finish();
    });
    design.output("count", count.out());
    design
}

/// A strobe input stretched to a one-cycle pulse on the output.
fn blinker() -> Design {
    let design = Design::new();
    let strobe = design.input("strobe", 1);
    let level = design.input("level", 8);
    let pulse = design.pulse(8, 0);
    design.when(strobe, || design.assign(pulse, level));
    design.output("led", pulse.out());
    design
}

/// Copies one register-file cell per cycle, driven by a small counter.
fn memcopy() -> Design {
    let design = Design::new();
    let ram = design.ram(4, 8, Some("image.hex"));
    let cursor = design.reg(4, 0);
    design.assign(cursor, design.add(cursor.out(), design.lit(1, 4)));
    let data = design.ram_read(ram, cursor.out());
    design.ram_write(ram, design.not(cursor.out()), data);
    design.when(design.eq(cursor.out(), design.lit(7, 4)), || design.finish());
    design.output("cursor", cursor.out());
    design
}

fn main() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let args = Args::parse();
    let design = match args.demo.as_str() {
        "counter" => counter(),
        "blinker" => blinker(),
        "memcopy" => memcopy(),
        other => {
            eprintln!("unknown demo {other:?} (available: counter, blinker, memcopy)");
            std::process::exit(1);
        }
    };
    let netlist: Netlist = design.into_netlist();
    if args.stats {
        println!("entries:  {}", netlist.entries.len());
        println!("schedule: {}", netlist.schedule.len());
        println!("actions:  {}", netlist.actions.len());
    } else {
        print!("{netlist}");
    }
}
