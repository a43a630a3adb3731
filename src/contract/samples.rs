//! Sample contracts shipped with the node.

/// Holds a single balance that can be deposited into and withdrawn from.
pub const TRANSFER_CONTRACT: &str = r#"
fn init() {
    set_state("balance", 0);
    return "Transfer contract initialized";
}

fn deposit(amount) {
    let amount = amount ?? 0;
    let balance = (get_state("balance") ?? 0) + amount;
    set_state("balance", balance);
    return "Deposited " + amount + ", new balance: " + balance;
}

fn withdraw(amount) {
    let amount = amount ?? 0;
    let balance = get_state("balance") ?? 0;
    if amount > balance {
        fail("Insufficient balance");
    }
    set_state("balance", balance - amount);
    return "Withdrawn " + amount + ", new balance: " + (balance - amount);
}

fn get_balance() {
    return get_state("balance") ?? 0;
}
"#;

/// English auction. `init` takes an optional `duration` in seconds (default one hour)
/// and an optional `description`.
pub const AUCTION_CONTRACT: &str = r#"
fn init(duration, description) {
    set_state("highest_bid", 0);
    set_state("highest_bidder", "");
    set_state("end_time", now() + (duration ?? 3600));
    set_state("owner", caller);
    set_state("item_description", description ?? "No description");
    set_state("closed", false);
    return "Auction initialized";
}

fn bid(amount) {
    if get_state("closed") {
        fail("Auction is closed");
    }
    let end_time = get_state("end_time");
    if end_time != null && now() > end_time {
        fail("Auction has ended");
    }

    let amount = amount ?? 0;
    let highest = get_state("highest_bid") ?? 0;
    if amount <= highest {
        fail("Bid must be higher than current highest bid: " + highest);
    }

    set_state("highest_bid", amount);
    set_state("highest_bidder", caller);
    return "New highest bid: " + amount + " by " + caller;
}

fn end_auction() {
    if caller != get_state("owner") {
        fail("Only the owner can end the auction");
    }
    if get_state("closed") {
        fail("Auction is already closed");
    }
    set_state("closed", true);
    let winner = get_state("highest_bidder") ?? "";
    let amount = get_state("highest_bid") ?? 0;
    return "Auction ended. Winner: " + winner + ", Amount: " + amount;
}

fn get_status() {
    return {
        "highest_bid": get_state("highest_bid"),
        "highest_bidder": get_state("highest_bidder"),
        "owner": get_state("owner"),
        "closed": get_state("closed"),
        "end_time": get_state("end_time"),
        "item_description": get_state("item_description"),
    };
}
"#;

pub fn all() -> [(&'static str, &'static str); 2] {
    [("transfer", TRANSFER_CONTRACT), ("auction", AUCTION_CONTRACT)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::parser::parse;

    #[test]
    fn test_samples_compile() {
        for (name, source) in all() {
            let program = parse(source).unwrap_or_else(|e| panic!("{} failed: {}", name, e));
            assert!(program.function("init").is_some());
        }
    }
}
