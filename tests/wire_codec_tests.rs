// Codec roundtrip and parsing against real-world IRC lines.

use busbot::wire::{self, Line};

#[test]
fn roundtrip_over_generated_messages() {
    let prefixes = ["", "nick!user@host", "irc.example.net"];
    let commands = ["PRIVMSG", "NOTICE", "352", "PING"];
    let heads: [&[&str]; 3] = [&[], &["#chan"], &["#chan", "arg2"]];
    let trailings = ["hello", "hello world", "with :colon inside", "~cmd arg", ""];

    for prefix in prefixes {
        for command in commands {
            for head in heads {
                for trailing in trailings {
                    let mut args: Vec<&str> = head.to_vec();
                    args.push(trailing);

                    let line = Line::new(prefix, command, &args);
                    let wire_form = line.serialize();
                    assert!(wire_form.ends_with("\r\n"));

                    let parsed = wire::parse(wire_form.trim_end_matches("\r\n")).unwrap();
                    assert_eq!(parsed, line, "roundtrip failed for {:?}", wire_form);
                }
            }
        }
    }
}

#[test]
fn parses_welcome_numeric() {
    let line = wire::parse(":irc.example.net 001 busbot :Welcome to the network busbot!b@h").unwrap();
    assert_eq!(line.prefix, "irc.example.net");
    assert_eq!(line.command, "001");
    assert_eq!(line.args[0], "busbot");
    assert_eq!(line.args[1], "Welcome to the network busbot!b@h");
}

#[test]
fn parses_names_reply() {
    let line = wire::parse(":server 353 busbot = #hack :@op +voiced plain").unwrap();
    assert_eq!(line.command, "353");
    assert_eq!(line.args, vec!["busbot", "=", "#hack", "@op +voiced plain"]);
}

#[test]
fn parses_kick_with_reason() {
    let line = wire::parse(":op!o@h KICK #hack troll :begone").unwrap();
    assert_eq!(line.command, "KICK");
    assert_eq!(line.args, vec!["#hack", "troll", "begone"]);
}

#[test]
fn parses_command_invocation() {
    let line = wire::parse(":alice!u@h PRIVMSG #chan :~roll 2d6").unwrap();
    assert_eq!(line.prefix, "alice!u@h");
    assert_eq!(line.args[0], "#chan");
    assert_eq!(line.args[1], "~roll 2d6");
}

#[test]
fn whitespace_only_line_yields_empty_command() {
    let line = wire::parse(" ").unwrap();
    assert_eq!(line.command, "");
    assert!(line.args.is_empty());
}
