//! Numeric reply codes used by the engine.
//!
//! Only the numerics this server actually emits are listed; the constant
//! names follow the RFC / ircd-tradition spellings.

pub const RPL_WELCOME: u16 = 1;
pub const RPL_YOURHOST: u16 = 2;
pub const RPL_CREATED: u16 = 3;
pub const RPL_MYINFO: u16 = 4;

pub const RPL_UMODEIS: u16 = 221;

pub const RPL_STATSXLINE: u16 = 223;
pub const RPL_ENDOFSTATS: u16 = 219;

pub const RPL_AWAY: u16 = 301;
pub const RPL_UNAWAY: u16 = 305;
pub const RPL_NOWAWAY: u16 = 306;

pub const RPL_CHANNELMODEIS: u16 = 324;
pub const RPL_CREATIONTIME: u16 = 329;
pub const RPL_NOTOPIC: u16 = 331;
pub const RPL_TOPIC: u16 = 332;
pub const RPL_TOPICWHOTIME: u16 = 333;
pub const RPL_INVITING: u16 = 341;

pub const RPL_NAMREPLY: u16 = 353;
pub const RPL_ENDOFNAMES: u16 = 366;
pub const RPL_BANLIST: u16 = 367;
pub const RPL_ENDOFBANLIST: u16 = 368;

pub const RPL_YOUREOPER: u16 = 381;
pub const RPL_REHASHING: u16 = 382;

pub const ERR_NOSUCHNICK: u16 = 401;
pub const ERR_NOORIGIN: u16 = 409;
pub const ERR_NOSUCHCHANNEL: u16 = 403;
pub const ERR_CANNOTSENDTOCHAN: u16 = 404;
pub const ERR_NOTEXTTOSEND: u16 = 412;
pub const ERR_UNKNOWNCOMMAND: u16 = 421;
pub const ERR_NONICKNAMEGIVEN: u16 = 431;
pub const ERR_ERRONEUSNICKNAME: u16 = 432;
pub const ERR_NICKNAMEINUSE: u16 = 433;
pub const ERR_USERNOTINCHANNEL: u16 = 441;
pub const ERR_NOTONCHANNEL: u16 = 442;
pub const ERR_USERONCHANNEL: u16 = 443;
pub const ERR_NOTREGISTERED: u16 = 451;
pub const ERR_NEEDMOREPARAMS: u16 = 461;
pub const ERR_ALREADYREGISTERED: u16 = 462;
pub const ERR_PASSWDMISMATCH: u16 = 464;

pub const RPL_LINKCHANNEL: u16 = 470;
pub const ERR_CHANNELISFULL: u16 = 471;
pub const ERR_UNKNOWNMODE: u16 = 472;
pub const ERR_INVITEONLYCHAN: u16 = 473;
pub const ERR_BANNEDFROMCHAN: u16 = 474;
pub const ERR_BADCHANNELKEY: u16 = 475;
pub const ERR_BANLISTFULL: u16 = 478;

pub const ERR_NOPRIVILEGES: u16 = 481;
pub const ERR_CHANOPRIVSNEEDED: u16 = 482;

pub const ERR_UNKNOWNSNOMASK: u16 = 501;
pub const ERR_USERSDONTMATCH: u16 = 502;

/// Ban-redirect diagnostics (non-RFC, widely deployed).
pub const ERR_BANREDIRECT: u16 = 690;

pub const ERR_INVALIDMODEPARAM: u16 = 696;

/// Render a numeric reply line.
///
/// `params` are the middle parameters; `trailing` is appended after a `:`.
/// The target nick of an unregistered connection is `*` by convention.
pub fn reply(server: &str, code: u16, target: &str, params: &[&str], trailing: Option<&str>) -> String {
    let mut line = format!(":{server} {code:03} {target}");
    for p in params {
        line.push(' ');
        line.push_str(p);
    }
    if let Some(t) = trailing {
        line.push_str(" :");
        line.push_str(t);
    }
    line
}
