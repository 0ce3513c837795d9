use colored::Colorize;

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

pub fn print_decision(granted: bool, subject: &str) {
    if granted {
        print_success(&format!("{subject}: {}", "granted".green().bold()));
    } else {
        print_error(&format!("{subject}: {}", "denied".red().bold()));
    }
}

pub fn print_field(label: &str, value: impl std::fmt::Display) {
    println!("{}: {}", label.cyan(), value);
}
