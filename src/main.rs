#[macro_use]
extern crate log;

use simplelog::{ColorChoice, CombinedLogger, ConfigBuilder, LevelFilter, TermLogger, TerminalMode};
use std::env;
use std::io::{self, BufRead};
use std::net::{SocketAddr, ToSocketAddrs};
use std::process;

use kademlia_vanish::{Contact, FindValueReply, Key, LookupValue, Node};

const USAGE: &str = "usage: kademlia-vanish <listen ip:port> [first peer host:port] [log level]";

fn parse_key(token: &str, what: &str) -> Result<Key, String> {
    Key::from_hex(token).map_err(|_| format!("ERR: Provided an invalid {} ({})", what, token))
}

fn lookup_contact(node: &Node, token: &str) -> Result<Contact, String> {
    let id = parse_key(token, "node ID")?;
    node.find_contact(&id)
        .map_err(|_| format!("ERR: Unable to find contact with node ID ({})", token))
}

fn resolve(token: &str) -> Option<SocketAddr> {
    token.to_socket_addrs().ok()?.find(|addr| addr.is_ipv4())
}

fn format_contacts(contacts: &[Contact]) -> String {
    let mut ret = format!("OK: {} contacts", contacts.len());
    for contact in contacts {
        ret.push_str(&format!("\n    {} {}", contact.id, contact.addr()));
    }
    ret
}

fn check_args(toks: &[&str], count: usize, usage: &str) -> Result<(), String> {
    if toks.len() == count {
        Ok(())
    } else {
        Err(format!("ERR: usage: {}", usage))
    }
}

/// Executes one command line. Returns `None` if the node should shut down.
fn execute_line(node: &Node, line: &str) -> Option<String> {
    let toks: Vec<&str> = line.split_whitespace().collect();
    if toks[0] == "quit" {
        return None;
    }
    Some(match execute(node, &toks) {
        Ok(response) => response,
        Err(response) => response,
    })
}

fn execute(node: &Node, toks: &[&str]) -> Result<String, String> {
    match toks[0] {
        "whoami" => {
            check_args(toks, 1, "whoami")?;
            Ok(format!("OK: {}", node.id()))
        },
        "print_contact" => {
            check_args(toks, 2, "print_contact [nodeID]")?;
            let contact = lookup_contact(node, toks[1])?;
            Ok(format!(
                "OK: NodeID={}\n      Host={}\n      Port={}",
                contact.id, contact.ip, contact.port
            ))
        },
        "ping" => {
            check_args(toks, 2, "ping [nodeID | host:port]")?;
            let addr = match Key::from_hex(toks[1]) {
                Ok(id) => node
                    .find_contact(&id)
                    .map(|contact| contact.addr())
                    .map_err(|_| "ERR: Not a valid Node ID or host:port address".to_string())?,
                Err(_) => resolve(toks[1])
                    .ok_or_else(|| "ERR: Not a valid Node ID or host:port address".to_string())?,
            };
            let contact = node.ping(addr).map_err(|err| format!("ERR: {}", err))?;
            Ok(format!("OK: {}", contact.id))
        },
        "local_find_value" => {
            check_args(toks, 2, "local_find_value [key]")?;
            let key = parse_key(toks[1], "key")?;
            match node.local_find_value(&key) {
                Some(value) => Ok(format!("OK: {}", String::from_utf8_lossy(&value))),
                None => Err("ERR: Cannot find this value".to_string()),
            }
        },
        "store" => {
            check_args(toks, 4, "store [nodeID] [key] [value]")?;
            let contact = lookup_contact(node, toks[1])?;
            let key = parse_key(toks[2], "key")?;
            node.store(&contact, key, toks[3].as_bytes().to_vec())
                .map_err(|err| format!("ERR: {}", err))?;
            Ok("OK".to_string())
        },
        "find_node" => {
            check_args(toks, 3, "find_node [nodeID] [key]")?;
            let contact = lookup_contact(node, toks[1])?;
            let key = parse_key(toks[2], "key")?;
            let nodes = node.find_node(&contact, &key).map_err(|err| format!("ERR: {}", err))?;
            Ok(format_contacts(&nodes))
        },
        "find_value" => {
            check_args(toks, 3, "find_value [nodeID] [key]")?;
            let contact = lookup_contact(node, toks[1])?;
            let key = parse_key(toks[2], "key")?;
            match node.find_value(&contact, &key).map_err(|err| format!("ERR: {}", err))? {
                FindValueReply::Value(value) => {
                    Ok(format!("OK: Value={}", String::from_utf8_lossy(&value)))
                },
                FindValueReply::Nodes(nodes) => Ok(format_contacts(&nodes)),
            }
        },
        "iterativeFindNode" => {
            check_args(toks, 2, "iterativeFindNode [nodeID]")?;
            let id = parse_key(toks[1], "node ID")?;
            Ok(format_contacts(&node.iterative_find_node(&id)))
        },
        "iterativeStore" => {
            check_args(toks, 3, "iterativeStore [key] [value]")?;
            let key = parse_key(toks[1], "key")?;
            let stored = node
                .iterative_store(key, toks[2].as_bytes().to_vec())
                .map_err(|err| format!("ERR: {}", err))?;
            match stored.first() {
                Some(contact) => Ok(format!("OK: stored at {}", contact.id)),
                None => Err("ERR: No nodes to store at".to_string()),
            }
        },
        "iterativeFindValue" => {
            check_args(toks, 2, "iterativeFindValue [key]")?;
            let key = parse_key(toks[1], "key")?;
            match node.iterative_find_value(&key) {
                LookupValue::Found { value, holder } => Ok(format!(
                    "OK: ID={} Value={}",
                    holder.id,
                    String::from_utf8_lossy(&value)
                )),
                LookupValue::NotFound(_) => Err("ERR: Value not found".to_string()),
            }
        },
        "vanish" => {
            check_args(toks, 5, "vanish [VDO] [data] [numberKeys] [threshold]")?;
            let vdo_id = parse_key(toks[1], "VDO key")?;
            let number_keys: u8 = toks[3]
                .parse()
                .map_err(|_| format!("ERR: Provided an invalid N ({})", toks[3]))?;
            let threshold: u8 = toks[4]
                .parse()
                .map_err(|_| format!("ERR: Provided an invalid T ({})", toks[4]))?;
            node.vanish(vdo_id, toks[2].as_bytes(), number_keys, threshold)
                .map_err(|err| format!("ERR: {}", err))?;
            Ok(format!("OK: vanished {}", vdo_id))
        },
        "unvanish" => {
            check_args(toks, 3, "unvanish [nodeID] [VDO]")?;
            let contact = lookup_contact(node, toks[1])?;
            let vdo_id = parse_key(toks[2], "VDO key")?;
            let data = node
                .unvanish(&contact, &vdo_id)
                .map_err(|err| format!("ERR: {}", err))?;
            Ok(format!("OK: {}", String::from_utf8_lossy(&data)))
        },
        _ => Err("ERR: Unknown command".to_string()),
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 || args.len() > 4 {
        eprintln!("{}", USAGE);
        process::exit(1);
    }

    let level = match args.get(3) {
        Some(level) => level.parse().unwrap_or(LevelFilter::Info),
        None => LevelFilter::Info,
    };
    let logger_config = ConfigBuilder::new().build();
    if let Err(err) = CombinedLogger::init(vec![TermLogger::new(
        level,
        logger_config,
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )]) {
        eprintln!("could not install logger: {}", err);
    }

    let listen = match resolve(&args[1]) {
        Some(addr) => addr,
        None => {
            eprintln!("{}", USAGE);
            process::exit(1);
        },
    };
    let node = match Node::new(&listen.ip().to_string(), &listen.port().to_string(), None) {
        Ok(node) => node,
        Err(err) => {
            eprintln!("ERR: {}", err);
            process::exit(1);
        },
    };

    if let Some(peer) = args.get(2) {
        match resolve(peer).map(|addr| node.ping(addr)) {
            Some(Ok(contact)) => {
                info!("Bootstrapping from {:?}", contact);
                node.iterative_find_node(&node.id());
            },
            Some(Err(err)) => eprintln!("ERR: {}", err),
            None => eprintln!("ERR: Not a valid host:port address ({})", peer),
        }
    }

    let input = io::stdin();
    for line in input.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }
        match execute_line(&node, line.trim()) {
            Some(response) => println!("{}", response),
            None => break,
        }
    }
    node.kill();
}
