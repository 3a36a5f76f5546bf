use std::time::Duration;

use anyhow::{anyhow, Context};
use arbor_client::{
    api::{
        AuthToken, CommentApi, CommentId, NewForest, NewPost, NewSession, NewUser, PostId, UserId,
        Uuid, Visibility,
    },
    ActionError, Collapse, ControllerConfig, DeletePolicy, HttpApi, InteractionController,
};

#[derive(structopt::StructOpt)]
struct Opt {
    #[structopt(short, long, env = "ARBOR_HOST")]
    host: String,

    /// Session token, as printed by `login`
    #[structopt(long, env = "ARBOR_TOKEN")]
    token: Option<Uuid>,

    /// Give up on requests to the server after this long
    #[structopt(long, default_value = "30")]
    timeout_secs: u64,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(structopt::StructOpt)]
enum Command {
    /// Create a user, with the ADMIN_TOKEN environment variable
    CreateUser {
        /// Username
        name: String,

        /// Initial password
        initial_password: String,
    },

    /// Open a session and print its token
    Login {
        name: String,
        password: String,

        #[structopt(long, default_value = "arbor-ctl")]
        device: String,
    },

    /// Print a post and its comments
    Show {
        post: Uuid,

        /// Also show replies that are collapsed by default
        #[structopt(long)]
        expand_all: bool,
    },

    /// Comment on a post, or reply to one of its comments
    Reply {
        post: Uuid,

        content: String,

        #[structopt(long)]
        parent: Option<Uuid>,

        #[structopt(long)]
        image_url: Option<String>,
    },

    /// Change the content of one of your comments
    Edit {
        post: Uuid,
        comment: Uuid,
        content: String,
    },

    /// Delete one of your comments
    Delete {
        post: Uuid,
        comment: Uuid,

        /// Keep showing the comment as deleted, along with its replies
        #[structopt(long)]
        tombstone: bool,
    },

    NewPost {
        content: String,

        #[structopt(long)]
        forest: Option<Uuid>,
    },

    NewForest {
        name: String,

        /// Only show the forest's posts to you and your friends
        #[structopt(long)]
        private: bool,
    },

    /// Become friends with another user
    Befriend { user: Uuid },
}

fn admin_token() -> anyhow::Result<AuthToken> {
    let tok =
        std::env::var("ADMIN_TOKEN").context("retrieving ADMIN_TOKEN environment variable")?;
    let tok = Uuid::try_parse(&tok).context("parsing ADMIN_TOKEN as an auth token")?;
    Ok(AuthToken(tok))
}

fn render<A: CommentApi>(ctl: &InteractionController<A>) {
    let post = ctl.post();
    println!(
        "{} ({}), by {}",
        post.id.0,
        post.created_at.format("%Y-%m-%d %H:%M"),
        post.author.name
    );
    println!("{}", post.content);
    println!();
    for line in ctl.visible() {
        let n = line.node;
        let pad = "    ".repeat(line.indent);
        let marker = match (line.collapse, n.has_replies()) {
            (_, false) => " ",
            (Collapse::Expanded, true) => "-",
            (Collapse::Collapsed, true) => "+",
        };
        let edited = if n.is_edited() { " (edited)" } else { "" };
        println!(
            "{pad}{marker} {} {} at {}{edited}",
            n.id.0,
            n.author.name,
            n.created_at.format("%Y-%m-%d %H:%M")
        );
        if n.is_deleted() {
            println!("{pad}  [deleted]");
        } else {
            for text in n.content.lines() {
                println!("{pad}  {text}");
            }
            if let Some(url) = &n.image_url {
                println!("{pad}  [image: {}]", url.chars().take(80).collect::<String>());
            }
        }
        if line.hidden_replies > 0 {
            println!("{pad}  [{} hidden replies]", line.hidden_replies);
        }
    }
}

fn failed(e: ActionError) -> anyhow::Error {
    let msg = e.user_message();
    anyhow::Error::new(e).context(msg)
}

async fn controller(
    opt: &Opt,
    post: Uuid,
    delete_policy: DeletePolicy,
) -> anyhow::Result<InteractionController<HttpApi>> {
    let token = opt.token.map(AuthToken);
    let api = HttpApi::new(opt.host.clone(), token);
    let actor = match token {
        None => None,
        Some(_) => Some(api.whoami().await.context("checking session token")?),
    };
    let config = ControllerConfig {
        request_timeout: Duration::from_secs(opt.timeout_secs),
        delete_policy,
    };
    InteractionController::load(api, PostId(post), actor, config)
        .await
        .map_err(failed)
}

fn logged_in(opt: &Opt) -> anyhow::Result<HttpApi> {
    let token = opt
        .token
        .ok_or_else(|| anyhow!("this command requires --token or ARBOR_TOKEN"))?;
    Ok(HttpApi::new(opt.host.clone(), Some(AuthToken(token))))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let opt = <Opt as structopt::StructOpt>::from_args();

    match &opt.cmd {
        Command::CreateUser {
            name,
            initial_password,
        } => {
            let api = HttpApi::new(opt.host.clone(), Some(admin_token()?));
            let id = UserId(Uuid::new_v4());
            api.admin_create_user(&NewUser::new(id, name.clone(), initial_password.clone()))
                .await
                .context("creating user")?;
            println!("{}", id.0);
        }
        Command::Login {
            name,
            password,
            device,
        } => {
            let mut api = HttpApi::new(opt.host.clone(), None);
            let token = api
                .auth(&NewSession {
                    user: name.clone(),
                    password: password.clone(),
                    device: device.clone(),
                })
                .await
                .context("logging in")?;
            println!("{}", token.0);
        }
        Command::Show { post, expand_all } => {
            let mut ctl = controller(&opt, *post, DeletePolicy::RemoveSubtree).await?;
            if *expand_all {
                ctl.expand_all();
            }
            render(&ctl);
        }
        Command::Reply {
            post,
            content,
            parent,
            image_url,
        } => {
            let mut ctl = controller(&opt, *post, DeletePolicy::RemoveSubtree).await?;
            let parent = parent.map(CommentId);
            ctl.open_reply(parent.as_ref()).map_err(failed)?;
            let id = ctl
                .submit_reply(parent.as_ref(), content, image_url.clone())
                .await
                .map_err(failed)?;
            tracing::info!(comment = ?id, "reply posted");
            render(&ctl);
        }
        Command::Edit {
            post,
            comment,
            content,
        } => {
            let mut ctl = controller(&opt, *post, DeletePolicy::RemoveSubtree).await?;
            let comment = CommentId(*comment);
            ctl.start_edit(&comment).map_err(failed)?;
            ctl.submit_edit(&comment, content).await.map_err(failed)?;
            render(&ctl);
        }
        Command::Delete {
            post,
            comment,
            tombstone,
        } => {
            let policy = match tombstone {
                true => DeletePolicy::Tombstone,
                false => DeletePolicy::RemoveSubtree,
            };
            let mut ctl = controller(&opt, *post, policy).await?;
            ctl.request_delete(&CommentId(*comment))
                .await
                .map_err(failed)?;
            render(&ctl);
        }
        Command::NewPost { content, forest } => {
            let post = logged_in(&opt)?
                .create_post(&NewPost {
                    content: content.clone(),
                    forest: forest.map(arbor_client::api::ForestId),
                })
                .await
                .context("creating post")?;
            println!("{}", post.id.0);
        }
        Command::NewForest { name, private } => {
            let visibility = match private {
                true => Visibility::Private,
                false => Visibility::Public,
            };
            let forest = logged_in(&opt)?
                .create_forest(&NewForest {
                    name: name.clone(),
                    visibility,
                })
                .await
                .context("creating forest")?;
            println!("{}", forest.id.0);
        }
        Command::Befriend { user } => {
            logged_in(&opt)?
                .add_friend(UserId(*user))
                .await
                .context("adding friend")?;
        }
    }

    Ok(())
}
