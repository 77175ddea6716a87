use crate::core::error::StoreError;
use crate::core::model::{NewPlayer, Player, PlayerPatch};
use crate::core::store::{Reads, Store};
use crate::live::{Live, LiveEngine};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[clap(name = "player", about = "Manage players.")]
pub struct PlayerCli {
    #[clap(subcommand)]
    pub command: PlayerCommand,
}

#[derive(Subcommand, Debug)]
pub enum PlayerCommand {
    /// Add a player.
    Add {
        #[clap(value_name = "NAME")]
        name: String,
        /// Photo reference (URL or data URI).
        #[clap(long)]
        photo: Option<String>,
        #[clap(long, default_value = "#3b82f6")]
        color: String,
    },
    /// List players by name.
    List,
    /// Delete a player and detach them from every round.
    Delete {
        #[clap(value_name = "ID")]
        id: String,
    },
}

pub fn add_player(store: &Store, new: NewPlayer) -> Result<Player, StoreError> {
    store.create::<Player>(new)
}

pub fn update_player(
    store: &Store,
    id: &str,
    patches: Vec<PlayerPatch>,
) -> Result<Player, StoreError> {
    store.update::<Player>(id, patches)
}

/// Removes the player and drops their id from every round's participants.
pub fn delete_player(store: &Store, id: &str) -> Result<bool, StoreError> {
    store.delete::<Player>(id)
}

fn by_name(mut players: Vec<Player>) -> Vec<Player> {
    players.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
    players
}

pub fn list_players(store: &Store) -> Result<Vec<Player>, StoreError> {
    Ok(by_name(store.all::<Player>()?))
}

pub fn players_live(engine: &LiveEngine) -> Result<Live<Vec<Player>>, StoreError> {
    let query = engine.register("players", |r| Ok(by_name(r.all::<Player>()?)))?;
    Ok(query.into())
}

pub fn player_live(engine: &LiveEngine, id: &str) -> Result<Live<Option<Player>>, StoreError> {
    let id = id.to_string();
    let query = engine.register(&format!("player:{id}"), move |r| r.get::<Player>(&id))?;
    Ok(query.into())
}

pub fn run_player_cli(store: &Store, cli: PlayerCli) -> Result<(), StoreError> {
    use colored::Colorize;

    match cli.command {
        PlayerCommand::Add { name, photo, color } => {
            let player = add_player(
                store,
                NewPlayer {
                    name,
                    photo,
                    background_color: color,
                },
            )?;
            println!("{} {} {}", "created".green(), player.id.bold(), player.name);
        }
        PlayerCommand::List => {
            for player in list_players(store)? {
                println!("{}  {}", player.id.bold(), player.name);
            }
        }
        PlayerCommand::Delete { id } => {
            if delete_player(store, &id)? {
                println!("{} {}", "deleted".yellow(), id.bold());
            } else {
                println!("{} {}", "no such player".dimmed(), id);
            }
        }
    }
    Ok(())
}
