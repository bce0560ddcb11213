pub mod account;
pub mod automation;
pub mod feed;
pub mod function;
pub mod gasbank;
pub mod oracle;
pub mod secret;
