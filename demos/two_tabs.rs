//! Two tabs sharing one text field, like an input echoed in another window

use crosstab::{bind, MemoryStorage};

fn main() {
    tracing_subscriber::fmt::init();

    println!("=== Two Tabs ===\n");

    let storage = MemoryStorage::default();
    let tab_a = storage.open_tab();
    let tab_b = storage.open_tab();

    let input = bind(tab_a.clone(), "key-in-local-storage", String::new());
    let echo = bind(tab_b.clone(), "key-in-local-storage", String::new());

    let _render = echo.watch(|value| {
        println!("   [tab b] current state : {value}");
    });

    println!("1. Typing into tab a");
    let set_input = input.setter();
    for text in ["h", "he", "hel", "hell", "hello"] {
        set_input.set(text.to_string());
        tab_b.dispatch_pending().unwrap();
    }

    println!("\n2. Stored entry");
    println!("   {:?}", storage.peek("key-in-local-storage"));

    println!("\n3. Tab b answers");
    echo.set("hello back".to_string());
    tab_a.dispatch_pending().unwrap();
    println!("   [tab a] current state : {}", input.get());

    println!("\n4. Closing tab b");
    drop(echo);
    input.set("anyone there?".to_string());
    let delivered = tab_b.dispatch_pending().unwrap();
    println!(
        "   events delivered to closed binding: {delivered}, listeners left: {}",
        tab_b.listener_count()
    );
}
