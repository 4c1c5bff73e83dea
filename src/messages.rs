use crate::storage::Page;

pub const HELP: &str = "I can keep a reading list for you.\n\n\
     Send me a link and I'll save it. When you have time to read, \
     ask for a random one:\n\n\
     /random - get a random saved link (it is removed from your list once sent)\n\
     /help - show this message";

pub const HELLO: &str = "Hi there! 👾";

pub const UNKNOWN_COMMAND: &str = "Unknown command 🤔 Send /help to see what I can do.";
pub const NO_SAVED_PAGES: &str = "You have no saved pages 🙊";
pub const SAVED: &str = "Saved! 👌";
pub const ALREADY_EXISTS: &str = "You already have this page in your list 🤗";
pub const TOO_MANY_REQUESTS: &str = "Too many requests. Please try again later.";

pub fn greeting() -> String {
    format!("{}\n\n{}", HELLO, HELP)
}

pub fn random_page(page: &Page) -> String {
    match &page.title {
        Some(title) => format!("Here is your random link:\n{}\n{}", title, page.url),
        None => format!("Here is your random link:\n{}", page.url),
    }
}
