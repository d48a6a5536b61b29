//! An echo bot: repeats whatever is sent to it, either in a channel
//! (only when addressed by nick) or as a direct PRIVMSG.
//!
//! Run with: `echo <nick> <server> <port> [<chan_1> ... <chan_N>]`
//!
//! Grounded in `libtiny_client/examples/echo.rs`; doubles as a runnable
//! smoke test of the whole stack (SPEC_FULL.md §10).

use std::process::exit;
use std::sync::Arc;

use ircbot::config::Config;
use ircbot::context::Context;
use ircbot::match_engine::{Handler, MatchTableBuilder};
use ircbot::registry::CompiledUnit;
use ircbot::Bot;

static NICK_SEP: [&str; 4] = [": ", ", ", ":", ","];

fn show_usage() {
    println!("echo <nick> <server> <port> [<chan_1> .. <chan_N>]");
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let mut args: Vec<String> = std::env::args().collect();
    if args.len() < 4 {
        show_usage();
        exit(1);
    }

    let nick = args.remove(1);
    let server = args.remove(1);
    let port_str = args.remove(1);
    let port: u16 = match port_str.parse() {
        Ok(port) => port,
        Err(err) => {
            eprintln!("can't parse port {port_str:?}: {err}");
            exit(1);
        }
    };
    let channels: Vec<String> = args[1..].to_vec();

    let config = Config {
        server,
        server_ip_type: Default::default(),
        port,
        use_ssl: false,
        bot_name: nick,
        password: None,
        channels,
        help_cmd: None,
        reconnect_interval_ms: 5_000,
        server_timeout_ms: Some(120_000),
    };

    let mut bot = Bot::new(config).unwrap_or_else(|e| {
        eprintln!("invalid configuration: {e}");
        exit(1);
    });

    let table = MatchTableBuilder::new("echo")
        .command("PRIVMSG", |group| {
            group.on_all(Handler::new(echo_handler));
        })
        .build()
        .expect("echo unit's match table always compiles");
    bot.register(Arc::new(CompiledUnit::new(table)));

    bot.run().await;
}

async fn echo_handler(ctx: Context) {
    let nick = ctx.conn.current_nick();
    let channel_addressed = ircbot::context::is_channel_addressed(&ctx.message, &nick);

    let echo_text = if channel_addressed {
        let text = &ctx.message.trailing;
        if let Some(rest) = text.strip_prefix(&nick) {
            let stripped = NICK_SEP
                .iter()
                .find_map(|sep| rest.strip_prefix(sep))
                .unwrap_or(rest);
            Some(stripped.to_owned())
        } else {
            None
        }
    } else {
        Some(ctx.message.trailing.clone())
    };

    if let Some(text) = echo_text {
        ctx.reply(&text).await;
    }
}
